//! NAT rule synthesis and reconciliation
//!
//! The rule file holds a single nftables table owned by the manager:
//!
//! - `prerouting` (dstnat): one DNAT per protocol per rule, sending traffic
//!   that arrives on the public interface to `127.0.0.1:<local_port>`
//! - `postrouting` (srcnat): one MASQUERADE for loopback-sourced traffic
//!   leaving the public interface
//!
//! The file starts by declaring and deleting its table so loading it twice
//! leaves exactly one copy.

use std::fmt::Write as _;
use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chimera_core::RuleSet;
use chimera_settings::ManagerSettings;
use chimera_system::{InterfaceResolver, PacketFilterBackend};
use tracing::{debug, error, info, warn};

use crate::{ForwardError, Result};

/// Loopback address the tunnel listener binds
const LOCAL_TARGET: &str = "127.0.0.1";

/// What happened to the rule file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// Rule file rewritten with the current rules
    Written,
    /// No rules: rule file deleted
    Removed,
}

/// How the backend took the new rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Reload succeeded
    Reloaded,
    /// Reload failed, restart succeeded
    Restarted { reload_error: String },
    /// Neither reload nor restart succeeded
    Failed {
        reload_error: String,
        restart_error: String,
    },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Result of one synthesis pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Public interface the rules were scoped to
    pub interface: String,
    /// Number of rules rendered
    pub rule_count: usize,
    pub file_action: FileAction,
    pub outcome: ApplyOutcome,
}

impl SyncReport {
    /// Turn a failed backend apply into [`ForwardError::BackendApply`]
    pub fn ensure_applied(self) -> Result<Self> {
        match &self.outcome {
            ApplyOutcome::Failed {
                reload_error,
                restart_error,
            } => Err(ForwardError::BackendApply(format!(
                "reload: {}; restart: {}",
                reload_error, restart_error
            ))),
            _ => Ok(self),
        }
    }
}

/// Regenerates the NAT rule file from the rule store
pub struct NatSynthesizer {
    rules_file: PathBuf,
    backend_config: PathBuf,
    table_name: String,
    routes: Arc<dyn InterfaceResolver>,
    backend: Arc<dyn PacketFilterBackend>,
}

impl NatSynthesizer {
    pub fn new(
        settings: &ManagerSettings,
        routes: Arc<dyn InterfaceResolver>,
        backend: Arc<dyn PacketFilterBackend>,
    ) -> Self {
        Self {
            rules_file: settings.paths.nat_rules_file.clone(),
            backend_config: settings.paths.backend_config.clone(),
            table_name: settings.nat.table_name.clone(),
            routes,
            backend,
        }
    }

    pub fn rules_file(&self) -> &Path {
        &self.rules_file
    }

    /// Make the backend's NAT state match `rules`.
    ///
    /// Config repair and interface lookup failures abort before the rule file
    /// is touched. A backend that refuses the rules is reported in the
    /// returned [`SyncReport`], not as an error.
    pub fn synthesize(&self, rules: &RuleSet) -> Result<SyncReport> {
        self.ensure_include()?;

        let interface = self
            .routes
            .default_interface()
            .map_err(ForwardError::InterfaceResolution)?;
        debug!("Public interface is {}", interface);

        let file_action = if rules.is_empty() {
            self.remove_rules_file()?;
            FileAction::Removed
        } else {
            let ruleset = render_ruleset(&self.table_name, &interface, rules);
            self.write_rules_file(&ruleset)?;
            FileAction::Written
        };

        let outcome = self.apply();
        Ok(SyncReport {
            interface,
            rule_count: rules.len(),
            file_action,
            outcome,
        })
    }

    /// Ensure the backend main config loads the rule file.
    ///
    /// Appends an include for the rules directory when no existing include
    /// targets the rule file, then re-reads the config; if the rule file is
    /// still not loaded the config cannot be trusted and synthesis stops.
    pub fn ensure_include(&self) -> Result<()> {
        let dir = self.rules_dir();
        fs::create_dir_all(&dir)?;

        if self.config_loads_rules()? {
            return Ok(());
        }

        let line = include_line(&dir);
        warn!(
            "{:?} does not load {:?}, adding `{}`",
            self.backend_config, self.rules_file, line
        );
        self.append_include(&line)
            .map_err(|e| ForwardError::ConfigRepair(e.to_string()))?;

        if self.config_loads_rules()? {
            info!("Added rules directory include to {:?}", self.backend_config);
            Ok(())
        } else {
            Err(ForwardError::ConfigRepair(format!(
                "{:?} still does not load {:?}",
                self.backend_config, self.rules_file
            )))
        }
    }

    fn rules_dir(&self) -> PathBuf {
        self.rules_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    fn config_loads_rules(&self) -> Result<bool> {
        let content = match fs::read_to_string(&self.backend_config) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ForwardError::ConfigRepair(e.to_string())),
        };
        Ok(content
            .lines()
            .filter_map(include_target)
            .any(|target| includes_file(Path::new(target), &self.rules_file)))
    }

    fn append_include(&self, line: &str) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.backend_config)?;
        writeln!(file, "\n# Added by chimera-manager\n{}", line)?;
        file.sync_all()
    }

    fn write_rules_file(&self, ruleset: &str) -> Result<()> {
        let mut name = self
            .rules_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        let temp_path = self.rules_file.with_file_name(name);
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(ruleset.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.rules_file)?;
        info!("Wrote NAT rules to {:?}", self.rules_file);
        Ok(())
    }

    fn remove_rules_file(&self) -> Result<()> {
        match fs::remove_file(&self.rules_file) {
            Ok(()) => {
                info!("No forwarding rules; removed {:?}", self.rules_file);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn apply(&self) -> ApplyOutcome {
        let reload_error = match self.backend.reload() {
            Ok(()) => {
                info!("Packet filter reloaded");
                return ApplyOutcome::Reloaded;
            }
            Err(e) => e.to_string(),
        };

        warn!("Packet filter reload failed ({}), restarting", reload_error);
        match self.backend.restart() {
            Ok(()) => {
                info!("Packet filter restarted");
                ApplyOutcome::Restarted { reload_error }
            }
            Err(e) => {
                error!("Packet filter restart failed: {}", e);
                ApplyOutcome::Failed {
                    reload_error,
                    restart_error: e.to_string(),
                }
            }
        }
    }
}

/// Quoted path of an `include` statement, if `line` is one
fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("include")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let quoted = rest.trim_start().strip_prefix('"')?;
    quoted.split_once('"').map(|(target, _)| target)
}

/// Whether including `target` loads `file`: either the exact path, or a glob
/// whose directory is the file's own directory and whose pattern matches the
/// file name
fn includes_file(target: &Path, file: &Path) -> bool {
    if target == file {
        return true;
    }
    if target.parent() != file.parent() {
        return false;
    }
    match (target.file_name(), file.file_name()) {
        (Some(pattern), Some(name)) => {
            glob_match(pattern.to_string_lossy().as_bytes(), name.to_string_lossy().as_bytes())
        }
        _ => false,
    }
}

/// Shell-style match supporting `*` and `?`. Bracket classes match literally.
fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => (0..=name.len()).any(|skip| glob_match(rest, &name[skip..])),
        Some((b'?', rest)) => !name.is_empty() && glob_match(rest, &name[1..]),
        Some((c, rest)) => name.first() == Some(c) && glob_match(rest, &name[1..]),
    }
}

/// Include statement covering every `.nft` file in `dir`
pub fn include_line(dir: &Path) -> String {
    format!("include \"{}/*.nft\"", dir.to_string_lossy().trim_end_matches('/'))
}

/// Render the full NAT table for `rules`, scoped to `interface`
pub fn render_ruleset(table: &str, interface: &str, rules: &RuleSet) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#!/usr/sbin/nft -f");
    let _ = writeln!(out, "# Managed by chimera-manager; regenerated on every change.");
    let _ = writeln!(out);
    let _ = writeln!(out, "table ip {}", table);
    let _ = writeln!(out, "delete table ip {}", table);
    let _ = writeln!(out);
    let _ = writeln!(out, "table ip {} {{", table);

    let _ = writeln!(out, "\tchain prerouting {{");
    let _ = writeln!(
        out,
        "\t\ttype nat hook prerouting priority dstnat; policy accept;"
    );
    for (name, rule) in rules {
        let _ = writeln!(
            out,
            "\t\t# {}: {} -> {}:{}",
            name, rule.public_ports, rule.dest_ip, rule.dest_port
        );
        for proto in ["tcp", "udp"] {
            let _ = writeln!(
                out,
                "\t\tiifname \"{}\" {} dport {} dnat to {}:{}",
                interface,
                proto,
                rule.public_ports.to_nft_set(),
                LOCAL_TARGET,
                rule.local_port
            );
        }
    }
    let _ = writeln!(out, "\t}}");
    let _ = writeln!(out);

    let _ = writeln!(out, "\tchain postrouting {{");
    let _ = writeln!(
        out,
        "\t\ttype nat hook postrouting priority srcnat; policy accept;"
    );
    let _ = writeln!(
        out,
        "\t\tip saddr {} oifname \"{}\" masquerade",
        LOCAL_TARGET, interface
    );
    let _ = writeln!(out, "\t}}");
    let _ = writeln!(out, "}}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_core::{ForwardingRule, PortSpec};
    use chimera_system::fake::{FakePacketFilter, FakeRoutes, FilterCall};

    struct Fixture {
        _dir: tempfile::TempDir,
        settings: ManagerSettings,
        routes: Arc<FakeRoutes>,
        backend: Arc<FakePacketFilter>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let settings = ManagerSettings::rooted_at(dir.path());
            Self {
                _dir: dir,
                settings,
                routes: Arc::new(FakeRoutes::new("eth0")),
                backend: Arc::new(FakePacketFilter::new()),
            }
        }

        fn synth(&self) -> NatSynthesizer {
            NatSynthesizer::new(&self.settings, self.routes.clone(), self.backend.clone())
        }
    }

    fn rules(entries: &[(&str, u16)]) -> RuleSet {
        entries
            .iter()
            .map(|(ports, local)| {
                let rule = ForwardingRule::new(
                    PortSpec::parse(ports).unwrap(),
                    *local,
                    "127.0.0.1".parse().unwrap(),
                    *local,
                );
                (rule.name(), rule)
            })
            .collect()
    }

    #[test]
    fn test_render_single_rule() {
        let text = render_ruleset("chimera_nat", "eth0", &rules(&[("9000", 9000)]));
        assert!(text.contains(
            "iifname \"eth0\" tcp dport { 9000 } dnat to 127.0.0.1:9000"
        ));
        assert!(text.contains(
            "iifname \"eth0\" udp dport { 9000 } dnat to 127.0.0.1:9000"
        ));
        assert_eq!(text.matches("masquerade").count(), 1);
        assert!(text.contains("ip saddr 127.0.0.1 oifname \"eth0\" masquerade"));
        assert!(text.contains("type nat hook prerouting priority dstnat; policy accept;"));
        assert!(text.contains("type nat hook postrouting priority srcnat; policy accept;"));
    }

    #[test]
    fn test_render_many_rules_one_masquerade() {
        let text = render_ruleset(
            "chimera_nat",
            "ens3",
            &rules(&[("8000-8002,8443", 9000), ("53", 5353), ("25565", 25565)]),
        );
        assert_eq!(text.matches(" dnat to ").count(), 6);
        assert_eq!(text.matches("masquerade").count(), 1);
        assert!(text.contains("tcp dport { 8000-8002, 8443 } dnat to 127.0.0.1:9000"));
    }

    #[test]
    fn test_render_is_order_independent() {
        let a = rules(&[("80", 8080), ("443", 8443)]);
        let b = rules(&[("443", 8443), ("80", 8080)]);
        assert_eq!(
            render_ruleset("t", "eth0", &a),
            render_ruleset("t", "eth0", &b)
        );
    }

    #[test]
    fn test_synthesize_is_idempotent() {
        let fx = Fixture::new();
        let synth = fx.synth();
        let set = rules(&[("8000-8002", 9000), ("53", 5353)]);

        synth.synthesize(&set).unwrap();
        let first = fs::read(synth.rules_file()).unwrap();
        synth.synthesize(&set).unwrap();
        let second = fs::read(synth.rules_file()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_synthesize_writes_and_reloads() {
        let fx = Fixture::new();
        let report = fx.synth().synthesize(&rules(&[("9000", 9000)])).unwrap();

        assert_eq!(report.file_action, FileAction::Written);
        assert_eq!(report.outcome, ApplyOutcome::Reloaded);
        assert_eq!(report.interface, "eth0");
        assert_eq!(fx.backend.calls(), vec![FilterCall::Reload]);
    }

    #[test]
    fn test_empty_rules_delete_file() {
        let fx = Fixture::new();
        let synth = fx.synth();
        synth.synthesize(&rules(&[("9000", 9000)])).unwrap();
        assert!(synth.rules_file().exists());
        fx.backend.clear();

        let report = synth.synthesize(&RuleSet::new()).unwrap();
        assert_eq!(report.file_action, FileAction::Removed);
        assert!(!synth.rules_file().exists());
        assert_eq!(fx.backend.calls(), vec![FilterCall::Reload]);
    }

    #[test]
    fn test_empty_rules_without_existing_file() {
        let fx = Fixture::new();
        let report = fx.synth().synthesize(&RuleSet::new()).unwrap();
        assert_eq!(report.file_action, FileAction::Removed);
        assert_eq!(fx.backend.calls(), vec![FilterCall::Reload]);
    }

    #[test]
    fn test_reload_failure_falls_back_to_restart() {
        let fx = Fixture::new();
        fx.backend.fail_reload(true);

        let report = fx.synth().synthesize(&rules(&[("9000", 9000)])).unwrap();
        assert!(matches!(report.outcome, ApplyOutcome::Restarted { .. }));
        assert_eq!(fx.backend.calls(), vec![FilterCall::Reload, FilterCall::Restart]);
    }

    #[test]
    fn test_total_apply_failure_is_reported_not_raised() {
        let fx = Fixture::new();
        fx.backend.fail_reload(true);
        fx.backend.fail_restart(true);

        let report = fx.synth().synthesize(&rules(&[("9000", 9000)])).unwrap();
        assert!(!report.outcome.is_applied());
        assert!(matches!(
            report.ensure_applied(),
            Err(ForwardError::BackendApply(_))
        ));
    }

    #[test]
    fn test_interface_failure_leaves_rules_untouched() {
        let fx = Fixture::new();
        let synth = fx.synth();
        synth.synthesize(&rules(&[("9000", 9000)])).unwrap();
        let before = fs::read(synth.rules_file()).unwrap();
        fx.backend.clear();

        fx.routes.set(None);
        let err = synth.synthesize(&RuleSet::new()).unwrap_err();
        assert!(matches!(err, ForwardError::InterfaceResolution(_)));
        assert_eq!(fs::read(synth.rules_file()).unwrap(), before);
        assert!(fx.backend.calls().is_empty());
    }

    #[test]
    fn test_include_repair_appends_line() {
        let fx = Fixture::new();
        let config = &fx.settings.paths.backend_config;
        fs::create_dir_all(config.parent().unwrap()).unwrap();
        fs::write(config, "#!/usr/sbin/nft -f\nflush ruleset\n").unwrap();

        fx.synth().ensure_include().unwrap();

        let content = fs::read_to_string(config).unwrap();
        let expected = include_line(&fx.settings.paths.nat_rules_dir());
        assert!(content.starts_with("#!/usr/sbin/nft -f\nflush ruleset\n"));
        assert_eq!(content.matches(&expected).count(), 1);

        // Already included: no second line.
        fx.synth().ensure_include().unwrap();
        let again = fs::read_to_string(config).unwrap();
        assert_eq!(again.matches(&expected).count(), 1);
    }

    #[test]
    fn test_include_repair_creates_missing_config() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.settings.paths.backend_config.parent().unwrap()).unwrap();
        fx.synth().ensure_include().unwrap();
        assert!(fx.settings.paths.backend_config.exists());
    }

    #[test]
    fn test_include_repair_failure_aborts() {
        let fx = Fixture::new();
        // A directory where the config file should be cannot be appended to.
        fs::create_dir_all(&fx.settings.paths.backend_config).unwrap();

        let err = fx.synth().synthesize(&rules(&[("9000", 9000)])).unwrap_err();
        assert!(matches!(err, ForwardError::ConfigRepair(_)));
        assert!(!fx.settings.paths.nat_rules_file.exists());
        assert!(fx.backend.calls().is_empty());
    }

    fn write_config(fx: &Fixture, content: &str) {
        let config = &fx.settings.paths.backend_config;
        fs::create_dir_all(config.parent().unwrap()).unwrap();
        fs::write(config, content).unwrap();
    }

    #[test]
    fn test_include_of_sibling_file_is_repaired() {
        let fx = Fixture::new();
        let dir = fx.settings.paths.nat_rules_dir();
        write_config(
            &fx,
            &format!("flush ruleset\ninclude \"{}/firewall.nft\"\n", dir.display()),
        );

        fx.synth().ensure_include().unwrap();

        let content = fs::read_to_string(&fx.settings.paths.backend_config).unwrap();
        assert!(content.contains("/firewall.nft\"\n"));
        assert_eq!(content.matches(&include_line(&dir)).count(), 1);
    }

    #[test]
    fn test_include_of_prefixed_directory_is_repaired() {
        let fx = Fixture::new();
        let dir = fx.settings.paths.nat_rules_dir();
        write_config(
            &fx,
            &format!("include \"{}.disabled/*.nft\"\n", dir.display()),
        );

        fx.synth().ensure_include().unwrap();

        let content = fs::read_to_string(&fx.settings.paths.backend_config).unwrap();
        assert_eq!(content.matches(&include_line(&dir)).count(), 1);
    }

    #[test]
    fn test_include_of_exact_rule_file_is_accepted() {
        let fx = Fixture::new();
        let original = format!(
            "include \"{}\"\n",
            fx.settings.paths.nat_rules_file.display()
        );
        write_config(&fx, &original);

        fx.synth().ensure_include().unwrap();
        assert_eq!(
            fs::read_to_string(&fx.settings.paths.backend_config).unwrap(),
            original
        );
    }

    #[test]
    fn test_include_still_missing_after_repair_aborts() {
        let mut fx = Fixture::new();
        // The appended `*.nft` glob cannot match a rule file with another suffix.
        fx.settings.paths.nat_rules_file = fx
            .settings
            .paths
            .nat_rules_dir()
            .join("chimera-nat.rules");
        write_config(&fx, "flush ruleset\n");

        let err = fx.synth().synthesize(&rules(&[("9000", 9000)])).unwrap_err();
        assert!(matches!(err, ForwardError::ConfigRepair(_)));

        let content = fs::read_to_string(&fx.settings.paths.backend_config).unwrap();
        assert!(content.contains(&include_line(&fx.settings.paths.nat_rules_dir())));
        assert!(!fx.settings.paths.nat_rules_file.exists());
        assert!(fx.backend.calls().is_empty());
    }

    #[test]
    fn test_include_target_parsing() {
        assert_eq!(include_target("include \"/a/*.nft\""), Some("/a/*.nft"));
        assert_eq!(include_target("  include \"/a/b.nft\" # note"), Some("/a/b.nft"));
        assert_eq!(include_target("# include \"/a/*.nft\""), None);
        assert_eq!(include_target("includes \"/a/*.nft\""), None);
        assert_eq!(include_target("include /a/*.nft"), None);
    }

    #[test]
    fn test_includes_file() {
        let file = Path::new("/etc/nftables.d/chimera-nat.nft");
        assert!(includes_file(Path::new("/etc/nftables.d/*.nft"), file));
        assert!(includes_file(Path::new("/etc/nftables.d/chimera-*"), file));
        assert!(includes_file(Path::new("/etc/nftables.d/chimera-nat.nf?"), file));
        assert!(includes_file(file, file));
        assert!(!includes_file(Path::new("/etc/nftables.d/firewall.nft"), file));
        assert!(!includes_file(Path::new("/etc/nftables.d.disabled/*.nft"), file));
        assert!(!includes_file(Path::new("/etc/*.nft"), file));
        assert!(!includes_file(Path::new("/etc/nftables.d/*.conf"), file));
    }

    #[test]
    fn test_include_line_format() {
        assert_eq!(
            include_line(Path::new("/etc/nftables.d")),
            "include \"/etc/nftables.d/*.nft\""
        );
    }
}
