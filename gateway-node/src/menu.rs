//! Interactive console menu
//!
//! A small tree of numbered menus read one key at a time. Any key outside a
//! menu's range (including `X`) leaves that menu; leaving the main menu just
//! draws it again. The task ends only when the console runs out of input.

use std::sync::Arc;

use gateway_mcu::{Console, ConnectivityType, NetStack};
use log::*;

use crate::link::Link;
use crate::notification::Command;
use crate::orchestrator::{App, Orchestrator};

const BORDER: &str = "===============================================================";

/// Whether `key` falls in the menu range `min..=max`
///
/// Case-insensitive. A numeric `min` with an alphabetic `max` spans `min..='9'`
/// followed by `'a'..=max`.
pub fn is_within(key: char, min: char, max: char) -> bool {
    let key = key.to_ascii_lowercase();
    let min = min.to_ascii_lowercase();
    let max = max.to_ascii_lowercase();
    match (min.is_ascii_digit(), max.is_ascii_digit()) {
        (true, true) | (false, false) => (min..=max).contains(&key),
        (true, false) => (min..='9').contains(&key) || ('a'..=max).contains(&key),
        (false, true) => false,
    }
}

/// Key for the `n`th entry of a menu, starting at 1
fn option_key(n: usize) -> char {
    u32::try_from(n)
        .ok()
        .and_then(|n| char::from_digit(n, 10))
        .unwrap_or('?')
}

/// Input ended; unwinds every open menu
struct InputClosed;

type MenuResult = Result<(), InputClosed>;

pub struct ConsoleMenu<C: Console, N: NetStack> {
    console: C,
    orchestrator: Arc<Orchestrator<N>>,
}

impl<C: Console, N: NetStack> ConsoleMenu<C, N> {
    pub fn new(console: C, orchestrator: Arc<Orchestrator<N>>) -> Self {
        Self { console, orchestrator }
    }

    /// Task body; returns when the console input is gone
    pub fn run(mut self) {
        info!("console: menu started");
        while self.main_menu().is_ok() {}
        info!("console: input closed, menu exiting");
    }

    fn say(&mut self, line: &str) {
        self.console.print_line(line);
    }

    fn key(&mut self) -> Result<char, InputClosed> {
        let key = self.console.read_key().ok_or(InputClosed)?;
        self.say("");
        Ok(key.to_ascii_lowercase())
    }

    fn main_menu(&mut self) -> MenuResult {
        let has_apps = !self.orchestrator.apps().is_empty();
        let last = if has_apps { '2' } else { '1' };

        self.say(BORDER);
        self.say("# Console Menu");
        self.say("  1  Manage I/O");
        if has_apps {
            self.say("  2  Manage Apps");
        }
        self.say("  X  Exit");

        let key = self.key()?;
        if !is_within(key, '1', last) {
            return Ok(());
        }
        match key {
            '1' => self.io_list_menu(),
            _ => self.app_list_menu(),
        }
    }

    fn io_list_menu(&mut self) -> MenuResult {
        loop {
            let io_types = self.orchestrator.io_types();
            let default_io = self.orchestrator.default_io();

            self.say(BORDER);
            self.say("# Manage I/O");
            for (i, kind) in io_types.iter().enumerate() {
                let marker = if *kind == default_io { " (default)" } else { "" };
                let status = self.orchestrator.io_status(*kind);
                self.say(&format!("  {}  {}{marker} - {status}", option_key(i + 1), io_label(*kind)));
            }
            self.say("  X  Exit");

            let key = self.key()?;
            if !is_within(key, '1', option_key(io_types.len())) {
                return Ok(());
            }
            let Some(kind) = key
                .to_digit(10)
                .and_then(|n| io_types.get(n as usize - 1))
                .copied()
            else {
                return Ok(());
            };

            if let Some(link) = self.orchestrator.routes().link(kind).cloned() {
                self.show_addressing(&link);
            }
            self.io_action_menu(kind)?;
        }
    }

    fn show_addressing(&mut self, link: &Link) {
        let ip = link
            .ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "none".to_string());
        self.say(&format!("# {} IP: {ip}", io_label(link.kind())));
        match link.dns().as_slice() {
            [] => self.say("# DNS: none"),
            [single] => self.say(&format!("# DNS: {single}")),
            servers => {
                for (i, dns) in servers.iter().enumerate() {
                    self.say(&format!("# DNS{}: {dns}", i + 1));
                }
            }
        }
    }

    fn io_action_menu(&mut self, kind: ConnectivityType) -> MenuResult {
        let can_set_default = self.orchestrator.io_types().len() > 1;
        let last = if can_set_default { '4' } else { '3' };
        loop {
            self.say(BORDER);
            self.say(&format!("# Manage {}", io_label(kind)));
            self.say("  1  Stop");
            self.say("  2  Start");
            self.say("  3  Restart I/O");
            if can_set_default {
                self.say("  4  Set as default I/O");
            }
            self.say("  X  Exit");

            let key = self.key()?;
            if !is_within(key, '1', last) {
                return Ok(());
            }
            let result = match key {
                '4' => self.orchestrator.set_default_io(kind),
                _ => match action_command(key) {
                    Some(command) => self.orchestrator.notify_io(kind, command),
                    None => return Ok(()),
                },
            };
            if let Err(e) = result {
                self.say(&format!("# {e}"));
            }
        }
    }

    fn app_list_menu(&mut self) -> MenuResult {
        loop {
            let apps = self.orchestrator.apps();

            self.say(BORDER);
            self.say("# Manage Apps");
            for (i, app) in apps.iter().enumerate() {
                let status = self.orchestrator.app_status(*app);
                self.say(&format!("  {}  {app} - {status}", option_key(i + 1)));
            }
            self.say("  X  Exit");

            let key = self.key()?;
            if !is_within(key, '1', option_key(apps.len())) {
                return Ok(());
            }
            let Some(app) = key.to_digit(10).and_then(|n| apps.get(n as usize - 1)).copied() else {
                return Ok(());
            };
            self.app_action_menu(app)?;
        }
    }

    fn app_action_menu(&mut self, app: App) -> MenuResult {
        loop {
            self.say(BORDER);
            self.say(&format!("# Manage {app}"));
            self.say("  1  Stop");
            self.say("  2  Start");
            self.say("  3  Restart App");
            self.say("  X  Exit");

            let key = self.key()?;
            if !is_within(key, '1', '3') {
                return Ok(());
            }
            let Some(command) = action_command(key) else {
                return Ok(());
            };
            if let Err(e) = self.orchestrator.notify_app(app, command) {
                self.say(&format!("# {e}"));
            }
        }
    }
}

fn action_command(key: char) -> Option<Command> {
    match key {
        '1' => Some(Command::Stop),
        '2' => Some(Command::Start),
        '3' => Some(Command::Restart),
        _ => None,
    }
}

fn io_label(kind: ConnectivityType) -> &'static str {
    match kind {
        ConnectivityType::WifiStation => "Wi-Fi",
        ConnectivityType::Cellular => "Cellular PPP",
        ConnectivityType::None => "None",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::{MqttHandle, MqttTask};
    use crate::routes::Routes;
    use crate::subscriber::DeviceSwitch;
    use crate::testing::{MockMqtt, MockNet, MockOutput, ScriptedConsole};
    use std::sync::Mutex;

    struct Fixture {
        wifi: Arc<Link>,
        cellular: Arc<Link>,
        mqtt: Option<Arc<MqttHandle>>,
        orchestrator: Arc<Orchestrator<MockNet>>,
    }

    fn fixture(with_mqtt: bool) -> Fixture {
        let wifi = Arc::new(Link::new(ConnectivityType::WifiStation));
        let cellular = Arc::new(Link::new(ConnectivityType::Cellular));
        let routes = Arc::new(Routes::new(
            Some(wifi.clone()),
            Some(cellular.clone()),
            ConnectivityType::Cellular,
        ));
        let mqtt = with_mqtt.then(|| {
            let switch = Arc::new(DeviceSwitch::new(Box::new(MockOutput::default())));
            MqttTask::new(MockMqtt::default(), Default::default(), routes.clone(), switch).1
        });
        let orchestrator = Arc::new(Orchestrator::new(routes, mqtt.clone(), MockNet::default()));
        Fixture {
            wifi,
            cellular,
            mqtt,
            orchestrator,
        }
    }

    fn run(fixture: &Fixture, keys: &str) -> Arc<Mutex<Vec<String>>> {
        let console = ScriptedConsole::new(keys);
        let lines = console.lines.clone();
        ConsoleMenu::new(console, fixture.orchestrator.clone()).run();
        lines
    }

    #[test]
    fn range_checks() {
        assert!(is_within('1', '1', '4'));
        assert!(is_within('4', '1', '4'));
        assert!(!is_within('5', '1', '4'));
        assert!(!is_within('x', '1', '4'));
        assert!(is_within('B', '1', 'c'));
        assert!(is_within('9', '1', 'c'));
        assert!(!is_within('d', '1', 'c'));
        assert!(!is_within('5', 'a', '9'));
    }

    #[test]
    fn io_list_marks_default_and_status() {
        let fixture = fixture(false);
        let lines = run(&fixture, "1");
        let lines = lines.lock().unwrap();
        assert!(lines.contains(&"  1  Wi-Fi - Stopped".to_string()));
        assert!(lines.contains(&"  2  Cellular PPP (default) - Stopped".to_string()));
        assert!(!lines.iter().any(|l| l.contains("Manage Apps")));
    }

    #[test]
    fn io_actions_notify_the_link() {
        let stopped = fixture(false);
        run(&stopped, "111");
        assert_eq!(stopped.wifi.context().pending_commands().dominant(), Some(Command::Stop));

        let started = fixture(false);
        run(&started, "122");
        assert_eq!(started.cellular.context().pending_commands().dominant(), Some(Command::Start));
        assert_eq!(started.wifi.context().pending_commands().dominant(), None);
    }

    #[test]
    fn set_default_from_menu() {
        let fixture = fixture(true);
        let lines = run(&fixture, "114x");
        assert_eq!(fixture.orchestrator.default_io(), ConnectivityType::WifiStation);
        assert!(lines.lock().unwrap().iter().any(|l| l == "# Wi-Fi IP: none"));
    }

    #[test]
    fn app_menu_drives_mqtt() {
        let fixture = fixture(true);
        let lines = run(&fixture, "2113");
        assert!(lines.lock().unwrap().contains(&"  1  MQTT - Stopped".to_string()));
        let mqtt = fixture.mqtt.as_ref().unwrap();
        assert_eq!(mqtt.context().pending_commands().dominant(), Some(Command::Restart));
    }

    #[test]
    fn out_of_range_keys_leave_the_menu() {
        let fixture = fixture(false);
        let lines = run(&fixture, "19x7");
        let lines = lines.lock().unwrap();
        let main_menus = lines.iter().filter(|l| *l == "# Console Menu").count();
        assert_eq!(main_menus, 4);
        assert_eq!(fixture.wifi.context().pending_commands().dominant(), None);
    }
}
