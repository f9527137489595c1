#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyBinding {
    pub key: char,
    pub action: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    Quit,
    RefreshNow,
}

pub const DASHBOARD_BINDINGS: [HotkeyBinding; 2] = [
    HotkeyBinding {
        key: 'q',
        action: "quit",
    },
    HotkeyBinding {
        key: 'r',
        action: "refresh now",
    },
];

pub fn controls_legend() -> String {
    let parts = DASHBOARD_BINDINGS
        .iter()
        .map(|binding| format!("{} {}", binding.key, binding.action))
        .collect::<Vec<_>>();
    format!("Keys: {}", parts.join("  "))
}

pub fn action_for_key(key: char) -> Option<HotkeyAction> {
    match key.to_ascii_lowercase() {
        'q' => Some(HotkeyAction::Quit),
        'r' => Some(HotkeyAction::RefreshNow),
        _ => None,
    }
}
