//! systemd unit for the relay binary

use std::path::Path;

/// Unit running `<binary> -config <config>` with automatic restart
pub fn render_unit(binary: &Path, config: &Path) -> String {
    format!(
        "[Unit]
Description=Chimera tunnel relay
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={} -config {}
Restart=always
RestartSec=5

[Install]
WantedBy=multi-user.target
",
        binary.display(),
        config.display()
    )
}
