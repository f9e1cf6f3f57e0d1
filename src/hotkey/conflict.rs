//! Best-effort check whether another program already owns a chord

use super::chord::Chord;

/// Asks the operating system whether a chord is claimed elsewhere.
///
/// `None` means the platform cannot tell; callers treat that as "no conflict".
pub trait ConflictProbe: Send + Sync {
    fn is_claimed(&self, chord: &Chord) -> Option<bool>;
}

/// Probe for platforms without a system-wide hotkey table
#[derive(Debug, Default)]
pub struct NoProbe;

impl ConflictProbe for NoProbe {
    fn is_claimed(&self, _chord: &Chord) -> Option<bool> {
        None
    }
}

/// The probe for the current platform
pub fn system_probe() -> Box<dyn ConflictProbe> {
    #[cfg(windows)]
    {
        Box::new(windows::RegisterHotKeyProbe)
    }

    #[cfg(not(windows))]
    {
        tracing::debug!("no system hotkey conflict detection on this platform");
        Box::new(NoProbe)
    }
}

#[cfg(windows)]
mod windows {
    use tracing::{debug, warn};
    use windows_sys::Win32::Foundation::{GetLastError, ERROR_HOTKEY_ALREADY_REGISTERED};
    use windows_sys::Win32::UI::Input::KeyboardAndMouse::{RegisterHotKey, UnregisterHotKey};

    use super::{Chord, ConflictProbe};

    const PROBE_HOTKEY_ID: i32 = 9999;

    /// Registers the chord as a temporary thread hotkey and immediately
    /// releases it; `ERROR_HOTKEY_ALREADY_REGISTERED` means someone else has it.
    pub struct RegisterHotKeyProbe;

    impl ConflictProbe for RegisterHotKeyProbe {
        fn is_claimed(&self, chord: &Chord) -> Option<bool> {
            let Some((flags, vk)) = chord.win32_parts() else {
                debug!(%chord, "chord has no virtual-key code, skipping conflict probe");
                return None;
            };

            // SAFETY: a null window handle binds the hotkey to this thread's
            // message queue; it is unregistered before returning.
            unsafe {
                if RegisterHotKey(std::ptr::null_mut(), PROBE_HOTKEY_ID, flags, vk) != 0 {
                    UnregisterHotKey(std::ptr::null_mut(), PROBE_HOTKEY_ID);
                    debug!(%chord, "no system hotkey conflict");
                    return Some(false);
                }

                let code = GetLastError();
                if code == ERROR_HOTKEY_ALREADY_REGISTERED {
                    debug!(%chord, "chord already registered by another program");
                    Some(true)
                } else {
                    warn!(%chord, code, "temporary hotkey registration failed for another reason");
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_probe_is_inconclusive() {
        let chord = Chord::parse("ctrl+alt+p").unwrap();
        assert_eq!(NoProbe.is_claimed(&chord), None);
    }
}
