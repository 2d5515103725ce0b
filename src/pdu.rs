//! Power distribution units.
//!
//! Three PDU families, three interaction styles. APC speaks a plain
//! command language (`olOn`, `olOff`, `olReboot`) with `E000`-class result
//! codes. Netbooter speaks terse commands (`pset`, `pshow`) but prints its
//! status as a pipe-drawn table under a different prompt. Eaton has no
//! command language at all; every operation is a walk through numbered
//! menus, driven with the session's raw send/expect primitives.
//!
//! All outlet-changing operations verify the outlet actually reached the
//! requested state by re-reading status on a bounded poll loop.

use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info, warn};
use regex::Regex;

use crate::error::{CommandError, Error, Result};
use crate::result::ReturnCode;
use crate::session::{Prompt, RunOptions, Session, SessionBuilder, MENU_ESCAPE_KEY};

/// How often an outlet's state is re-read while waiting for a change.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How many polls before a state change is declared failed. Together with
/// [`POLL_INTERVAL`] this allows a minute for relays to settle.
const POLL_ATTEMPTS: u32 = 30;

/// The supported PDU families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    Apc,
    Eaton,
    Netbooter,
}

/// Power state of one outlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    /// Mid power-cycle (Eaton reports this as `REB`).
    Rebooting,
}

impl PowerState {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "On" | "ON" => Some(PowerState::On),
            "Off" | "OFF" => Some(PowerState::Off),
            "REB" => Some(PowerState::Rebooting),
            _ => None,
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::On => write!(f, "On"),
            PowerState::Off => write!(f, "Off"),
            PowerState::Rebooting => write!(f, "Rebooting"),
        }
    }
}

/// One row of a PDU status report.
#[derive(Debug, Clone)]
pub struct OutletStatus {
    pub outlet: u32,
    /// Label configured on the PDU ("Outlet 12" when unset).
    pub name: String,
    pub state: PowerState,
}

/// A power distribution unit reachable over one of its consoles.
pub struct Pdu {
    session: Session,
    kind: PduKind,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl Pdu {
    /// Wrap an already-built session. The seam for custom transports.
    pub fn new(session: Session, kind: PduKind) -> Self {
        Self {
            session,
            kind,
            poll_interval: POLL_INTERVAL,
            poll_attempts: POLL_ATTEMPTS,
        }
    }

    /// A PDU reached through its telnet console. `port` selects a raw
    /// TCP port for units sitting behind serial console servers.
    pub fn telnet(
        kind: PduKind,
        host: impl Into<String>,
        port: Option<u16>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let mut builder = SessionBuilder::telnet(host)
            .username(username)
            .password(password)
            .prompt(Self::default_prompt(kind));
        if let Some(port) = port {
            builder = builder.port(port);
        }
        for pattern in Self::failure_patterns(kind) {
            builder = builder.failure_pattern(*pattern);
        }
        Ok(Self::new(builder.build()?, kind))
    }

    /// An APC unit reached over SSH instead of telnet.
    pub fn ssh(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let mut builder = SessionBuilder::ssh(host)
            .username(username)
            .password(password)
            .prompt(Self::default_prompt(PduKind::Apc));
        for pattern in Self::failure_patterns(PduKind::Apc) {
            builder = builder.failure_pattern(*pattern);
        }
        Ok(Self::new(builder.build()?, PduKind::Apc))
    }

    fn default_prompt(kind: PduKind) -> Prompt {
        match kind {
            PduKind::Apc => Prompt::literal("apc>"),
            // Eaton never settles on a prompt; connect syncs on the main
            // menu banner and everything after that is send/expect.
            PduKind::Eaton => Prompt::pattern("Main Menu"),
            PduKind::Netbooter => Prompt::literal(">"),
        }
    }

    fn failure_patterns(kind: PduKind) -> &'static [&'static str] {
        match kind {
            PduKind::Apc => &["E101: Command Not Found", "E102: Parameter Error"],
            PduKind::Eaton => &[],
            PduKind::Netbooter => &["Invalid command or parameters."],
        }
    }

    pub fn kind(&self) -> PduKind {
        self.kind
    }

    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    pub async fn connect(&mut self) -> Result<ReturnCode> {
        self.session.connect().await
    }

    pub async fn disconnect(&mut self) -> ReturnCode {
        self.session.disconnect().await
    }

    /// Read the state of every outlet, in panel order.
    pub async fn state(&mut self) -> Result<IndexMap<u32, OutletStatus>> {
        match self.kind {
            PduKind::Apc => {
                let r = self.run_and_check("olStatus all", true).await?;
                Ok(parse_apc_status(r.message()))
            }
            PduKind::Netbooter => {
                // pshow ends with a settings dump, not the prompt; sync
                // on the last line of the dump instead.
                let opts =
                    RunOptions::default().prompt(Prompt::literal("Power reboot duration"));
                let r = self.session.run_with("pshow", opts).await?;
                Ok(parse_netbooter_status(r.message()))
            }
            PduKind::Eaton => self.eaton_state().await,
        }
    }

    /// Turn an outlet on and wait for it to report On.
    pub async fn up(&mut self, outlet: u32) -> Result<ReturnCode> {
        self.up_opts(outlet, true, true).await
    }

    /// Turn an outlet on. `expectation` escalates command failures into
    /// errors; `wait` polls until the outlet reports On.
    pub async fn up_opts(
        &mut self,
        outlet: u32,
        expectation: bool,
        wait: bool,
    ) -> Result<ReturnCode> {
        info!("up {outlet}");
        let result = match self.kind {
            PduKind::Apc => self.run_and_check(&format!("olOn {outlet}"), expectation).await?,
            PduKind::Netbooter => {
                self.run_and_check(&format!("pset {outlet} 1"), expectation)
                    .await?
            }
            PduKind::Eaton => {
                self.eaton_outlet_command(outlet, EatonCommand::On, expectation)
                    .await?
            }
        };
        if wait && result.is_ok() {
            self.wait_for_state(outlet, PowerState::On).await?;
        }
        Ok(result)
    }

    /// Turn an outlet off and wait for it to report Off.
    pub async fn down(&mut self, outlet: u32) -> Result<ReturnCode> {
        self.down_opts(outlet, true, true).await
    }

    pub async fn down_opts(
        &mut self,
        outlet: u32,
        expectation: bool,
        wait: bool,
    ) -> Result<ReturnCode> {
        info!("down {outlet}");
        let result = match self.kind {
            PduKind::Apc => {
                self.run_and_check(&format!("olOff {outlet}"), expectation)
                    .await?
            }
            PduKind::Netbooter => {
                self.run_and_check(&format!("pset {outlet} 0"), expectation)
                    .await?
            }
            PduKind::Eaton => {
                self.eaton_outlet_command(outlet, EatonCommand::Off, expectation)
                    .await?
            }
        };
        if wait && result.is_ok() {
            self.wait_for_state(outlet, PowerState::Off).await?;
        }
        Ok(result)
    }

    /// Power-cycle an outlet. `delay` keeps the outlet off for that long
    /// on units that support it (APC); others cycle immediately.
    pub async fn cycle(&mut self, outlet: u32, delay: Option<Duration>) -> Result<ReturnCode> {
        self.cycle_opts(outlet, delay, true).await
    }

    pub async fn cycle_opts(
        &mut self,
        outlet: u32,
        delay: Option<Duration>,
        expectation: bool,
    ) -> Result<ReturnCode> {
        info!("cycle {outlet}");
        match self.kind {
            PduKind::Apc => {
                let delay = delay.unwrap_or(Duration::from_secs(5));
                let result = self
                    .run_and_check(&format!("olRbootTime {}", delay.as_secs()), expectation)
                    .await?;
                if !result.is_ok() {
                    return Ok(result);
                }
                self.run_and_check(&format!("olReboot {outlet}"), expectation)
                    .await
            }
            PduKind::Netbooter => {
                let result = self.down_opts(outlet, expectation, true).await?;
                if !result.is_ok() {
                    return Ok(result);
                }
                self.up_opts(outlet, expectation, true).await
            }
            PduKind::Eaton => {
                if delay.is_some() {
                    warn!("eaton cycle has no delay option");
                }
                self.eaton_outlet_command(outlet, EatonCommand::Reboot, expectation)
                    .await
            }
        }
    }

    async fn run_and_check(&mut self, cmd: &str, expectation: bool) -> Result<ReturnCode> {
        self.session
            .run_and_check(cmd, RunOptions::default(), expectation)
            .await
    }

    /// Poll status until `outlet` reports `want`, bounded by the poll
    /// budget.
    async fn wait_for_state(&mut self, outlet: u32, want: PowerState) -> Result<()> {
        for attempt in 0..self.poll_attempts {
            let state = self.state().await?;
            match state.get(&outlet) {
                Some(status) if status.state == want => return Ok(()),
                Some(status) => {
                    debug!("outlet {outlet} is {} waiting for {want}", status.state);
                }
                None => {
                    return Err(CommandError {
                        command: format!("outlet {outlet}"),
                        message: format!("outlet {outlet} not present in status report"),
                    }
                    .into());
                }
            }
            if attempt + 1 < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(CommandError {
            command: format!("outlet {outlet}"),
            message: format!("outlet {outlet} never reported {want}"),
        }
        .into())
    }

    /// Walk the Eaton status menus and collect all three outlet sections.
    async fn eaton_state(&mut self) -> Result<IndexMap<u32, OutletStatus>> {
        self.session.send_text("1").await?;
        self.expect_menu("Control Sub Menu").await?;
        self.session.send_text("1").await?;
        self.expect_menu("Outlet State Sub Menu").await?;
        self.session.send_text("1").await?;

        let mut output = self.expect_menu("Next outlet section").await?;
        for _ in 0..2 {
            self.session.send_line("n").await?;
            output.push_str(&self.expect_menu("Next outlet section").await?);
        }

        self.eaton_escape_to_main(4).await?;
        Ok(parse_eaton_status(&output))
    }

    /// One on/off/reboot walk through the Eaton control menus.
    async fn eaton_outlet_command(
        &mut self,
        outlet: u32,
        command: EatonCommand,
        expectation: bool,
    ) -> Result<ReturnCode> {
        // The command-choice menu titles outlets by their configured
        // name, so a status snapshot comes first.
        let snapshot = self.eaton_state().await?;
        let name = snapshot
            .get(&outlet)
            .map(|s| s.name.clone())
            .ok_or_else(|| CommandError {
                command: format!("outlet {outlet}"),
                message: format!("outlet {outlet} not present in status report"),
            })?;

        self.session.send_text("1").await?;
        self.expect_menu("Control Sub Menu").await?;
        self.session.send_text("1").await?;
        self.expect_menu("Outlet State Sub Menu").await?;

        // Outlets are grouped eight to a section.
        let section = match outlet {
            1..=8 => "1",
            9..=16 => "2",
            _ => "3",
        };
        self.session.send_text(section).await?;
        self.expect_menu("Outlet Control Sub Menu").await?;
        self.session.send_text(&outlet.to_string()).await?;
        self.expect_menu(&format!("{} Command Choices", regex::escape(&name)))
            .await?;
        self.session.send_text(command.choice()).await?;
        self.expect_menu(&format!(
            "{} Requested Command is {}",
            regex::escape(&name),
            command.confirmation()
        ))
        .await?;
        self.session.send_text("\r").await?;
        let before = self.expect_menu("Outlet State Sub Menu").await?;

        self.eaton_escape_to_main(3).await?;

        let failed = Regex::new(r"(?im)error|fail")
            .expect("eaton failure pattern")
            .is_match(&before);
        if failed {
            let result = ReturnCode::fail(before.trim().to_string());
            if expectation {
                return Err(Error::Command(CommandError {
                    command: format!("{} outlet {outlet}", command.confirmation()),
                    message: result.unwrap_message(),
                }));
            }
            return Ok(result);
        }
        Ok(ReturnCode::ok(""))
    }

    async fn expect_menu(&mut self, pattern: &str) -> Result<String> {
        self.session
            .expect(&Prompt::pattern(pattern), None)
            .await
    }

    /// Back out of `levels` sub-menus to the item-selection screen.
    async fn eaton_escape_to_main(&mut self, levels: usize) -> Result<()> {
        let escape = String::from_utf8_lossy(MENU_ESCAPE_KEY).into_owned();
        for _ in 0..levels {
            self.session.send_text(&escape).await?;
            self.expect_menu("Select Item Number").await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pdu").field("kind", &self.kind).finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum EatonCommand {
    On,
    Off,
    Reboot,
}

impl EatonCommand {
    /// Menu item number on the command-choices screen.
    fn choice(self) -> &'static str {
        match self {
            EatonCommand::On => "1",
            EatonCommand::Off => "2",
            EatonCommand::Reboot => "3",
        }
    }

    /// Wording of the confirmation screen.
    fn confirmation(self) -> &'static str {
        match self {
            EatonCommand::On => "Immediate On",
            EatonCommand::Off => "Immediate Off",
            EatonCommand::Reboot => "Reboot",
        }
    }
}

/// Parse `olStatus all` output. Rows follow an `E000: Success` line, one
/// outlet per line as `outlet: name: state`.
fn parse_apc_status(text: &str) -> IndexMap<u32, OutletStatus> {
    let mut results = IndexMap::new();
    let mut seen_success = false;
    for line in text.lines() {
        if !seen_success {
            if line.contains("E000") {
                seen_success = true;
            }
            continue;
        }
        let fields: Vec<&str> = line.split(':').map(str::trim).collect();
        if fields.len() < 3 {
            continue;
        }
        let Ok(outlet) = fields[0].parse::<u32>() else {
            continue;
        };
        let Some(state) = PowerState::parse(fields[2]) else {
            continue;
        };
        results.insert(
            outlet,
            OutletStatus {
                outlet,
                name: fields[1].to_string(),
                state,
            },
        );
    }
    results
}

/// Parse `pshow` output: a pipe-drawn table of `port | name | status`.
fn parse_netbooter_status(text: &str) -> IndexMap<u32, OutletStatus> {
    let row = Regex::new(r"\b(\d+)\s+\|\s+(\S+)\s+\|\s+(\S+)").expect("netbooter row pattern");
    let mut results = IndexMap::new();
    for caps in row.captures_iter(text) {
        let Ok(outlet) = caps[1].parse::<u32>() else {
            continue;
        };
        let Some(state) = PowerState::parse(&caps[3]) else {
            continue;
        };
        results.insert(
            outlet,
            OutletStatus {
                outlet,
                name: caps[2].to_string(),
                state,
            },
        );
    }
    results
}

/// Parse the Eaton outlet-state screens: `outlet  name  state` rows where
/// state is `On`, `Off` or `REB`.
fn parse_eaton_status(text: &str) -> IndexMap<u32, OutletStatus> {
    let row = Regex::new(r"(\d+)\s+(\S.*?)\s+(On|Off|REB)\b").expect("eaton row pattern");
    let mut results = IndexMap::new();
    for line in text.split(['\r', '\n']) {
        let Some(caps) = row.captures(line) else {
            continue;
        };
        let Ok(outlet) = caps[1].parse::<u32>() else {
            continue;
        };
        let Some(state) = PowerState::parse(&caps[3]) else {
            continue;
        };
        results.insert(
            outlet,
            OutletStatus {
                outlet,
                name: caps[2].trim().to_string(),
                state,
            },
        );
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apc_status() {
        let text = "E000: Success\n\
                    1: powerconnect 6248: On\n\
                    8: ?nodeB: On\n\
                    12: Outlet 12: Off\n";
        let status = parse_apc_status(text);
        assert_eq!(status.len(), 3);
        assert_eq!(status[&1].name, "powerconnect 6248");
        assert_eq!(status[&1].state, PowerState::On);
        assert_eq!(status[&12].state, PowerState::Off);
    }

    #[test]
    fn test_parse_apc_status_ignores_preamble() {
        let text = "apc corp\nfirmware v3\nE000: Success\n3: leoben: On\n";
        let status = parse_apc_status(text);
        assert_eq!(status.len(), 1);
        assert_eq!(status[&3].state, PowerState::On);
    }

    #[test]
    fn test_parse_netbooter_status() {
        let text = "+---+----------+--------+\r\n\
                    | 1 | Outlet1  | ON     |\r\n\
                    | 2 | esm-qa1  | OFF    |\r\n\
                    +---+----------+--------+\r\n";
        let status = parse_netbooter_status(text);
        assert_eq!(status.len(), 2);
        assert_eq!(status[&1].state, PowerState::On);
        assert_eq!(status[&2].name, "esm-qa1");
        assert_eq!(status[&2].state, PowerState::Off);
    }

    #[test]
    fn test_parse_eaton_status() {
        let text = "1   powerconnect 6248   On\r\
                    9   agathon   Off\r\
                    17  leoben   REB\r";
        let status = parse_eaton_status(text);
        assert_eq!(status.len(), 3);
        assert_eq!(status[&1].name, "powerconnect 6248");
        assert_eq!(status[&9].state, PowerState::Off);
        assert_eq!(status[&17].state, PowerState::Rebooting);
    }

    #[test]
    fn test_parse_rejects_noise() {
        assert!(parse_apc_status("no success line\n1: x: On").is_empty());
        assert!(parse_netbooter_status("nothing tabular here").is_empty());
        assert!(parse_eaton_status("Select Item Number").is_empty());
    }

    mod flows {
        use super::*;
        use crate::session::{LoginPlan, Session, SessionConfig};
        use crate::transport::mock::{ConnectScript, ScriptedConnector, ScriptedTransport};
        use std::sync::Arc;

        const PROMPT: &str = "apc>";

        fn apc_with(transport: ScriptedTransport) -> Pdu {
            let connector = Arc::new(ScriptedConnector::new(vec![ConnectScript::Transport(
                transport.chunk(format!("American Power Conversion\r\n{PROMPT}").as_bytes()),
            )]));
            let mut config = SessionConfig::new("pdu1", Prompt::literal(PROMPT));
            config.timeout = Duration::from_millis(500);
            let mut session = Session::new(connector, LoginPlan::ssh(), config).unwrap();
            for pattern in Pdu::failure_patterns(PduKind::Apc) {
                session.add_failure_pattern(*pattern);
            }
            let mut pdu = Pdu::new(session, PduKind::Apc);
            pdu.poll_interval = Duration::ZERO;
            pdu.poll_attempts = 2;
            pdu
        }

        #[test]
        fn test_apc_up_polls_until_on() {
            let transport = ScriptedTransport::new()
                .on_send(b"olOn 4", format!("olOn 4\r\nE000: Success\r\n{PROMPT}"))
                .on_send(
                    b"olStatus all",
                    format!("olStatus all\r\nE000: Success\r\n4: esm-qa1: On\r\n{PROMPT}"),
                );
            let mut pdu = apc_with(transport);
            tokio_test::block_on(async {
                pdu.connect().await.unwrap();
                let rc = pdu.up(4).await.unwrap();
                assert!(rc.is_ok());
            });
        }

        #[test]
        fn test_apc_unknown_command_escalates() {
            let transport = ScriptedTransport::new().on_send(
                b"olFrob 4",
                format!("olFrob 4\r\nE101: Command Not Found\r\n{PROMPT}"),
            );
            let mut pdu = apc_with(transport);
            tokio_test::block_on(async {
                pdu.connect().await.unwrap();
                let err = pdu
                    .session()
                    .run_and_check("olFrob 4", RunOptions::default(), true)
                    .await
                    .unwrap_err();
                assert!(matches!(err, Error::Command(_)));
            });
        }

        #[test]
        fn test_missing_outlet_is_an_error() {
            let transport = ScriptedTransport::new()
                .on_send(b"olOn 9", format!("olOn 9\r\nE000: Success\r\n{PROMPT}"))
                .on_send(
                    b"olStatus all",
                    format!("olStatus all\r\nE000: Success\r\n4: esm-qa1: On\r\n{PROMPT}"),
                );
            let mut pdu = apc_with(transport);
            tokio_test::block_on(async {
                pdu.connect().await.unwrap();
                let err = pdu.up(9).await.unwrap_err();
                assert!(matches!(err, Error::Command(_)));
            });
        }
    }
}
