use std::{fmt, str::FromStr};

use super::DeviceError;

pub const KEYCODE_HOME: u16 = 3;
pub const KEYCODE_BACK: u16 = 4;
pub const KEYCODE_DPAD_UP: u16 = 19;
pub const KEYCODE_DPAD_DOWN: u16 = 20;
pub const KEYCODE_DPAD_LEFT: u16 = 21;
pub const KEYCODE_DPAD_RIGHT: u16 = 22;
pub const KEYCODE_DPAD_CENTER: u16 = 23;
pub const KEYCODE_VOLUME_UP: u16 = 24;
pub const KEYCODE_VOLUME_DOWN: u16 = 25;
pub const KEYCODE_POWER: u16 = 26;
pub const KEYCODE_MUTE: u16 = 164;

const LAUNCHER_CATEGORY: &str = "android.intent.category.LAUNCHER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Ok,
    Back,
    Home,
}

impl Direction {
    pub const ALL: [Direction; 7] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
        Direction::Ok,
        Direction::Back,
        Direction::Home,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Ok => "ok",
            Direction::Back => "back",
            Direction::Home => "home",
        }
    }

    pub fn keycode(self) -> u16 {
        match self {
            Direction::Up => KEYCODE_DPAD_UP,
            Direction::Down => KEYCODE_DPAD_DOWN,
            Direction::Left => KEYCODE_DPAD_LEFT,
            Direction::Right => KEYCODE_DPAD_RIGHT,
            Direction::Ok => KEYCODE_DPAD_CENTER,
            Direction::Back => KEYCODE_BACK,
            Direction::Home => KEYCODE_HOME,
        }
    }

    /// Comma-separated list of accepted names, in declaration order.
    pub fn accepted() -> String {
        Self::ALL
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for Direction {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| DeviceError::InvalidDirection(s.to_string()))
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application package in reverse-DNS form, e.g. `com.netflix.ninja`.
///
/// The name ends up inside a shell instruction on the device, so only
/// dot-separated identifier segments are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageName(String);

impl PackageName {
    pub fn parse(raw: &str) -> Result<Self, DeviceError> {
        let segments: Vec<&str> = raw.split('.').collect();
        let valid = segments.len() >= 2 && segments.iter().all(|segment| valid_segment(segment));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(DeviceError::InvalidPackage(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Power,
    VolumeUp,
    VolumeDown,
    Mute,
    Navigate(Direction),
    LaunchApp(PackageName),
}

impl Command {
    /// Stable label used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Power => "power",
            Command::VolumeUp => "volume_up",
            Command::VolumeDown => "volume_down",
            Command::Mute => "mute",
            Command::Navigate(_) => "navigate",
            Command::LaunchApp(_) => "launch_app",
        }
    }

    pub fn keycode(&self) -> Option<u16> {
        match self {
            Command::Power => Some(KEYCODE_POWER),
            Command::VolumeUp => Some(KEYCODE_VOLUME_UP),
            Command::VolumeDown => Some(KEYCODE_VOLUME_DOWN),
            Command::Mute => Some(KEYCODE_MUTE),
            Command::Navigate(direction) => Some(direction.keycode()),
            Command::LaunchApp(_) => None,
        }
    }

    /// The single shell instruction this command becomes on the device.
    pub fn instruction(&self) -> String {
        match self {
            Command::LaunchApp(package) => {
                format!("monkey -p {package} -c {LAUNCHER_CATEGORY} 1")
            }
            Command::Power => keyevent(KEYCODE_POWER),
            Command::VolumeUp => keyevent(KEYCODE_VOLUME_UP),
            Command::VolumeDown => keyevent(KEYCODE_VOLUME_DOWN),
            Command::Mute => keyevent(KEYCODE_MUTE),
            Command::Navigate(direction) => keyevent(direction.keycode()),
        }
    }
}

fn keyevent(code: u16) -> String {
    format!("input keyevent {code}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_commands_map_to_keyevents() {
        assert_eq!(Command::Power.instruction(), "input keyevent 26");
        assert_eq!(Command::VolumeUp.instruction(), "input keyevent 24");
        assert_eq!(Command::VolumeDown.instruction(), "input keyevent 25");
        assert_eq!(Command::Mute.instruction(), "input keyevent 164");
        let codes: Vec<u16> = Direction::ALL.iter().map(|d| d.keycode()).collect();
        assert_eq!(codes, vec![19, 20, 21, 22, 23, 4, 3]);
    }

    #[test]
    fn launch_uses_launcher_intent() {
        let pkg = PackageName::parse("com.netflix.ninja").unwrap();
        assert_eq!(
            Command::LaunchApp(pkg).instruction(),
            "monkey -p com.netflix.ninja -c android.intent.category.LAUNCHER 1"
        );
    }

    #[test]
    fn direction_parsing_is_closed() {
        assert_eq!("ok".parse::<Direction>().unwrap(), Direction::Ok);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(DeviceError::InvalidDirection(d)) if d == "sideways"
        ));
        assert!("UP".parse::<Direction>().is_err());
        assert_eq!(
            Direction::accepted(),
            "up, down, left, right, ok, back, home"
        );
    }

    #[test]
    fn package_names_must_be_reverse_dns() {
        assert!(PackageName::parse("com.google.android.youtube.tv").is_ok());
        assert!(PackageName::parse("org.xbmc.kodi_2").is_ok());
        for bad in [
            "",
            "netflix",
            "com..netflix",
            "com.netflix; reboot",
            "com.1password",
            "com.netflix ninja",
            ".com.netflix",
        ] {
            assert!(PackageName::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
