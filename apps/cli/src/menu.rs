//! Interactive menus
//!
//! The console is generic over its reader and writer so every flow can be
//! driven from a script in tests.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};

use chimera_core::{parse_port, ForwardingRule};
use chimera_forward::{ApplyOutcome, ForwardManager, Mutation, RuleRequest, SyncReport};
use chimera_settings::ManagerSettings;
use chimera_setup::{ClientRequest, Installer, TunnelSetup};
use chimera_system::Host;

/// Main menu choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    SetupRelay,
    GenerateClientConfig,
    ManageForwarding,
    Uninstall,
    Exit,
}

impl MenuCommand {
    pub fn parse(choice: &str) -> Option<Self> {
        match choice.trim() {
            "1" => Some(Self::SetupRelay),
            "2" => Some(Self::GenerateClientConfig),
            "3" => Some(Self::ManageForwarding),
            "4" => Some(Self::Uninstall),
            "5" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// Forwarding submenu choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardCommand {
    Add,
    List,
    Remove,
    Resync,
    Back,
}

impl ForwardCommand {
    pub fn parse(choice: &str) -> Option<Self> {
        match choice.trim() {
            "1" => Some(Self::Add),
            "2" => Some(Self::List),
            "3" => Some(Self::Remove),
            "4" => Some(Self::Resync),
            "5" => Some(Self::Back),
            _ => None,
        }
    }
}

const MAIN_MENU: &str = "
--- Chimera Manager ---
1) Setup relay server
2) Generate client config
3) Manage port forwarding
4) Uninstall
5) Exit";

const FORWARD_MENU: &str = "
--- Port Forwarding ---
1) Add rule
2) List rules
3) Remove rule
4) Resync NAT rules
5) Back";

/// Line-oriented prompt over any reader and writer
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Print `label` and read one trimmed line; `None` once input is closed
    pub fn read(&mut self, label: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", label)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Like [`Console::read`], but closed input is an error
    pub fn ask(&mut self, label: &str) -> Result<String> {
        match self.read(label)? {
            Some(answer) => Ok(answer),
            None => bail!("input closed"),
        }
    }

    /// Ask with a default used for an empty answer
    pub fn ask_or(&mut self, label: &str, default: &str) -> Result<String> {
        let answer = self.ask(&format!("{} [{}]: ", label, default))?;
        Ok(if answer.is_empty() {
            default.to_string()
        } else {
            answer
        })
    }

    /// Yes/no question
    pub fn confirm(&mut self, label: &str, default_yes: bool) -> Result<bool> {
        let hint = if default_yes { "Y/n" } else { "y/N" };
        let answer = self.ask(&format!("{} [{}]: ", label, hint))?;
        Ok(match answer.to_ascii_lowercase().as_str() {
            "" => default_yes,
            "y" | "yes" => true,
            _ => false,
        })
    }

    pub fn say(&mut self, line: impl AsRef<str>) -> io::Result<()> {
        writeln!(self.output, "{}", line.as_ref())
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }
}

/// One interactive run of the manager
pub struct Session {
    settings: ManagerSettings,
    host: Host,
}

impl Session {
    pub fn new(settings: ManagerSettings, host: Host) -> Self {
        Self { settings, host }
    }

    /// Whether the process may change system state
    pub fn is_privileged(&self) -> bool {
        self.host.privileges.is_root()
    }

    /// Offer to install when the manager is not in its install location
    pub fn offer_install<R: BufRead, W: Write>(&self, console: &mut Console<R, W>) -> Result<()> {
        let installer = Installer::new(self.settings.clone(), self.host.clone());
        if installer.is_installed() {
            return Ok(());
        }
        if !console.confirm("Chimera is not installed. Install now?", true)? {
            return Ok(());
        }

        let current = std::env::current_exe().ok();
        match installer.install(current.as_deref()) {
            Ok(report) => {
                console.say(format!("Relay binary installed to {}", report.binary.display()))?;
                console.say(format!(
                    "Manager installed to {}; run it from there from now on.",
                    report.manager.display()
                ))?;
            }
            Err(e) => console.say(format!("Installation failed: {}", e))?,
        }
        Ok(())
    }

    /// Main menu loop; returns on Exit, after Uninstall, or when input closes
    pub fn run<R: BufRead, W: Write>(&self, console: &mut Console<R, W>) -> io::Result<()> {
        loop {
            console.say(MAIN_MENU)?;
            let Some(choice) = console.read("Choose an option: ")? else {
                return Ok(());
            };

            let result = match MenuCommand::parse(&choice) {
                Some(MenuCommand::SetupRelay) => self.setup_relay(console),
                Some(MenuCommand::GenerateClientConfig) => self.client_config(console),
                Some(MenuCommand::ManageForwarding) => self.forwarding(console),
                Some(MenuCommand::Uninstall) => match self.uninstall(console) {
                    Ok(true) => return Ok(()),
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                },
                Some(MenuCommand::Exit) => return Ok(()),
                None => {
                    console.say("Invalid option.")?;
                    Ok(())
                }
            };

            if let Err(e) = result {
                console.say(format!("Error: {:#}", e))?;
            }
        }
    }

    fn setup_relay<R: BufRead, W: Write>(&self, console: &mut Console<R, W>) -> Result<()> {
        let default = self.settings.relay.default_listen_port.to_string();
        let port = parse_port(&console.ask_or("Relay listen port", &default)?)?;

        let setup = TunnelSetup::new(self.settings.clone(), self.host.clone());
        let path = setup.setup_relay(port)?;
        console.say(format!("Relay config written to {}", path.display()))?;
        console.say(format!(
            "Service '{}' is running and listening on port {}.",
            self.settings.relay.unit_name, port
        ))?;
        Ok(())
    }

    fn client_config<R: BufRead, W: Write>(&self, console: &mut Console<R, W>) -> Result<()> {
        let relay_host = console.ask("Relay server address: ")?;
        let default = self.settings.relay.default_listen_port.to_string();
        let relay_port = parse_port(&console.ask_or("Relay port", &default)?)?;

        let google = match console.ask_or("Handshake method (static/google)", "static")?.as_str() {
            "static" => None,
            "google" => Some((
                console.ask("Google project id: ")?,
                console.ask("Pub/Sub topic id: ")?,
            )),
            other => bail!("unknown handshake method: {}", other),
        };

        let setup = TunnelSetup::new(self.settings.clone(), self.host.clone());
        let (path, json) = setup.generate_client_config(&ClientRequest {
            relay_host,
            relay_port,
            google,
        })?;
        console.say(format!("Client config written to {}:", path.display()))?;
        console.say(json)?;
        Ok(())
    }

    fn uninstall<R: BufRead, W: Write>(&self, console: &mut Console<R, W>) -> Result<bool> {
        if !console.confirm("Remove Chimera and all its rules?", false)? {
            console.say("Uninstall cancelled.")?;
            return Ok(false);
        }

        let installer = Installer::new(self.settings.clone(), self.host.clone());
        let report = installer.uninstall();
        for path in &report.removed {
            console.say(format!("Removed {}", path.display()))?;
        }
        for warning in &report.warnings {
            console.say(format!("Warning: {}", warning))?;
        }
        console.say("Chimera has been uninstalled.")?;
        Ok(true)
    }

    fn forwarding<R: BufRead, W: Write>(&self, console: &mut Console<R, W>) -> Result<()> {
        let manager = ForwardManager::new(&self.settings, &self.host);
        loop {
            console.say(FORWARD_MENU)?;
            let Some(choice) = console.read("Choose an option: ")? else {
                return Ok(());
            };

            let result = match ForwardCommand::parse(&choice) {
                Some(ForwardCommand::Add) => add_rule(&manager, console),
                Some(ForwardCommand::List) => list_rules(&manager, console),
                Some(ForwardCommand::Remove) => remove_rule(&manager, console),
                Some(ForwardCommand::Resync) => resync(&manager, console),
                Some(ForwardCommand::Back) => return Ok(()),
                None => {
                    console.say("Invalid option.")?;
                    Ok(())
                }
            };

            if let Err(e) = result {
                console.say(format!("Error: {:#}", e))?;
            }
        }
    }
}

fn add_rule<R: BufRead, W: Write>(manager: &ForwardManager, console: &mut Console<R, W>) -> Result<()> {
    let request = RuleRequest {
        public_ports: console.ask("Public port(s), e.g. 80 or 8000-8010,9000: ")?,
        local_port: console.ask("Local tunnel port: ")?,
        dest_ip: console.ask("Destination IP: ")?,
        dest_port: console.ask("Destination port: ")?,
    };

    let mutation = manager.add(&request).context("rule rejected")?;
    report_mutation(console, "added", &mutation)
}

fn remove_rule<R: BufRead, W: Write>(
    manager: &ForwardManager,
    console: &mut Console<R, W>,
) -> Result<()> {
    if manager.rules().is_empty() {
        console.say("No forwarding rules.")?;
        return Ok(());
    }
    list_rules(manager, console)?;

    let name = console.ask("Rule name to remove: ")?;
    let mutation = manager.remove(&name)?;
    report_mutation(console, "removed", &mutation)
}

fn list_rules<R: BufRead, W: Write>(manager: &ForwardManager, console: &mut Console<R, W>) -> Result<()> {
    let rules = manager.rules();
    if rules.is_empty() {
        console.say("No forwarding rules.")?;
        return Ok(());
    }

    console.say(format!(
        "{:<14} {:<24} {:<8} {}",
        "NAME", "PUBLIC PORTS", "LOCAL", "DESTINATION"
    ))?;
    for (name, rule) in &rules {
        console.say(rule_row(name, rule))?;
    }
    Ok(())
}

fn resync<R: BufRead, W: Write>(manager: &ForwardManager, console: &mut Console<R, W>) -> Result<()> {
    let report = manager.resync()?;
    console.say(describe_sync(&report))?;
    Ok(())
}

fn rule_row(name: &str, rule: &ForwardingRule) -> String {
    let destination = match rule.dest_ip {
        std::net::IpAddr::V6(ip) => format!("[{}]:{}", ip, rule.dest_port),
        ip => format!("{}:{}", ip, rule.dest_port),
    };
    format!(
        "{:<14} {:<24} {:<8} {}",
        name,
        rule.public_ports.as_str(),
        rule.local_port,
        destination
    )
}

fn describe_sync(report: &SyncReport) -> String {
    let how = match &report.outcome {
        ApplyOutcome::Reloaded => "reloaded",
        ApplyOutcome::Restarted { .. } => "restarted after reload failed",
        ApplyOutcome::Failed { .. } => "not applied",
    };
    format!(
        "NAT rules synced: {} rule(s) on {}, backend {}.",
        report.rule_count, report.interface, how
    )
}

fn report_mutation<W: Write, R: BufRead>(
    console: &mut Console<R, W>,
    verb: &str,
    mutation: &Mutation,
) -> Result<()> {
    match &mutation.sync {
        Ok(report) => {
            console.say(format!("Rule {} {}.", mutation.name, verb))?;
            console.say(describe_sync(report))?;
        }
        Err(e) => {
            console.say(format!(
                "Rule {} {}, but NAT rules were not applied: {}",
                mutation.name, verb, e
            ))?;
            console.say("Fix the problem and choose 'Resync NAT rules' to retry.")?;
        }
    }
    Ok(())
}
