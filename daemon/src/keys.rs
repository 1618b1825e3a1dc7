/// Key-name parsing for the two input systems the daemon touches:
/// `device_query` key codes on the listening side and `enigo` keys on the
/// injection side.
///
/// All parsers are case-insensitive and return `None` for unrecognised
/// names; callers treat `None` as "binding disabled" and log a warning.
use device_query::Keycode;
use enigo::Key;

/// Converts a key name (e.g. "F8", "A", "LControl") to a `device_query`
/// key code for the global listeners.
///
/// Supported names:
/// - Function keys `F1`–`F12`.
/// - ASCII letters `A`–`Z` and digits `0`–`9`.
/// - `Space`, `Escape`/`Esc`, `Enter`/`Return`, `Up`, `Down`, `Left`, `Right`.
/// - Sided modifiers: `LControl`/`LCtrl`, `RControl`/`RCtrl`, `LShift`,
///   `RShift`, `LAlt`, `RAlt`.
pub fn parse_keycode(name: &str) -> Option<Keycode> {
    match name.to_uppercase().as_str() {
        "F1" => Some(Keycode::F1),
        "F2" => Some(Keycode::F2),
        "F3" => Some(Keycode::F3),
        "F4" => Some(Keycode::F4),
        "F5" => Some(Keycode::F5),
        "F6" => Some(Keycode::F6),
        "F7" => Some(Keycode::F7),
        "F8" => Some(Keycode::F8),
        "F9" => Some(Keycode::F9),
        "F10" => Some(Keycode::F10),
        "F11" => Some(Keycode::F11),
        "F12" => Some(Keycode::F12),
        "SPACE" => Some(Keycode::Space),
        "ESCAPE" | "ESC" => Some(Keycode::Escape),
        "ENTER" | "RETURN" => Some(Keycode::Enter),
        "UP" => Some(Keycode::Up),
        "DOWN" => Some(Keycode::Down),
        "LEFT" => Some(Keycode::Left),
        "RIGHT" => Some(Keycode::Right),
        "LCONTROL" | "LCTRL" => Some(Keycode::LControl),
        "RCONTROL" | "RCTRL" => Some(Keycode::RControl),
        "LSHIFT" => Some(Keycode::LShift),
        "RSHIFT" => Some(Keycode::RShift),
        "LALT" => Some(Keycode::LAlt),
        "RALT" => Some(Keycode::RAlt),
        s if s.len() == 1 => {
            let c = s.chars().next().unwrap();
            match c {
                'A' => Some(Keycode::A),
                'B' => Some(Keycode::B),
                'C' => Some(Keycode::C),
                'D' => Some(Keycode::D),
                'E' => Some(Keycode::E),
                'F' => Some(Keycode::F),
                'G' => Some(Keycode::G),
                'H' => Some(Keycode::H),
                'I' => Some(Keycode::I),
                'J' => Some(Keycode::J),
                'K' => Some(Keycode::K),
                'L' => Some(Keycode::L),
                'M' => Some(Keycode::M),
                'N' => Some(Keycode::N),
                'O' => Some(Keycode::O),
                'P' => Some(Keycode::P),
                'Q' => Some(Keycode::Q),
                'R' => Some(Keycode::R),
                'S' => Some(Keycode::S),
                'T' => Some(Keycode::T),
                'U' => Some(Keycode::U),
                'V' => Some(Keycode::V),
                'W' => Some(Keycode::W),
                'X' => Some(Keycode::X),
                'Y' => Some(Keycode::Y),
                'Z' => Some(Keycode::Z),
                '0' => Some(Keycode::Key0),
                '1' => Some(Keycode::Key1),
                '2' => Some(Keycode::Key2),
                '3' => Some(Keycode::Key3),
                '4' => Some(Keycode::Key4),
                '5' => Some(Keycode::Key5),
                '6' => Some(Keycode::Key6),
                '7' => Some(Keycode::Key7),
                '8' => Some(Keycode::Key8),
                '9' => Some(Keycode::Key9),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Converts a pointer-button name to its index in
/// `device_query::MouseState::button_pressed` (1-based).
pub fn parse_pointer_button(name: &str) -> Option<usize> {
    match name.to_uppercase().as_str() {
        "LEFT" => Some(1),
        "RIGHT" => Some(2),
        "MIDDLE" => Some(3),
        "X1" | "MOUSE4" => Some(4),
        "X2" | "MOUSE5" => Some(5),
        _ => None,
    }
}

/// Converts a key name to an `enigo` key for the action workers.
///
/// Letters are injected lowercase; the game cares about the key, not the
/// shifted character.
pub fn parse_inject_key(name: &str) -> Option<Key> {
    match name.to_uppercase().as_str() {
        "F1" => Some(Key::F1),
        "F2" => Some(Key::F2),
        "F3" => Some(Key::F3),
        "F4" => Some(Key::F4),
        "F5" => Some(Key::F5),
        "F6" => Some(Key::F6),
        "F7" => Some(Key::F7),
        "F8" => Some(Key::F8),
        "F9" => Some(Key::F9),
        "F10" => Some(Key::F10),
        "F11" => Some(Key::F11),
        "F12" => Some(Key::F12),
        "SPACE" => Some(Key::Space),
        "ESCAPE" | "ESC" => Some(Key::Escape),
        "ENTER" | "RETURN" => Some(Key::Return),
        s if s.len() == 1 => {
            let c = s.chars().next().unwrap();
            if c.is_ascii_alphanumeric() {
                Some(Key::Unicode(c.to_ascii_lowercase()))
            } else {
                None
            }
        }
        _ => None,
    }
}
