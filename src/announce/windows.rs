//! NVDA and ZDSR controller clients loaded at run time

use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use tracing::{debug, info, warn};
use windows_sys::Win32::Foundation::{FreeLibrary, HMODULE};
use windows_sys::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

use super::ScreenReader;

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// An owned module handle
struct Library(HMODULE);

// SAFETY: a module handle is a process-wide value, valid from any thread
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    fn load(path: &Path) -> Option<Self> {
        if !path.is_file() {
            debug!(path = %path.display(), "screen reader client not present");
            return None;
        }
        let name = wide(path.as_os_str());
        // SAFETY: `name` is a NUL-terminated UTF-16 string
        let handle = unsafe { LoadLibraryW(name.as_ptr()) };
        if handle.is_null() {
            warn!(path = %path.display(), "failed to load screen reader client");
            return None;
        }
        Some(Self(handle))
    }

    /// Look up an export and reinterpret it as `F`.
    ///
    /// SAFETY: `F` must be the export's real function pointer type and
    /// `name` must be NUL-terminated.
    unsafe fn symbol<F: Copy>(&self, name: &[u8]) -> Option<F> {
        let proc = GetProcAddress(self.0, name.as_ptr())?;
        Some(std::mem::transmute_copy(&proc))
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        // SAFETY: the handle came from LoadLibraryW and is released once
        unsafe {
            FreeLibrary(self.0);
        }
    }
}

type NvdaTestIfRunning = unsafe extern "system" fn() -> i32;
type NvdaSpeakText = unsafe extern "system" fn(*const u16) -> i32;
type NvdaCancelSpeech = unsafe extern "system" fn() -> i32;

pub struct NvdaClient {
    test_if_running: NvdaTestIfRunning,
    speak_text: NvdaSpeakText,
    cancel_speech: NvdaCancelSpeech,
    _lib: Library,
}

impl NvdaClient {
    pub fn load(dir: &Path) -> Option<Self> {
        let lib = Library::load(&dir.join("nvdaControllerClient.dll"))?;
        // SAFETY: signatures from the NVDA controller client API
        let client = unsafe {
            Self {
                test_if_running: lib.symbol(b"nvdaController_testIfRunning\0")?,
                speak_text: lib.symbol(b"nvdaController_speakText\0")?,
                cancel_speech: lib.symbol(b"nvdaController_cancelSpeech\0")?,
                _lib: lib,
            }
        };
        info!("NVDA controller client loaded");
        Some(client)
    }
}

impl ScreenReader for NvdaClient {
    fn name(&self) -> &'static str {
        "nvda"
    }

    fn is_running(&self) -> bool {
        // SAFETY: no arguments
        unsafe { (self.test_if_running)() == 0 }
    }

    fn speak(&self, text: &str) {
        if !self.is_running() {
            debug!("NVDA not running, skipping speech");
            return;
        }
        let text = wide(OsStr::new(text));
        // SAFETY: NUL-terminated UTF-16 that outlives the call
        let code = unsafe { (self.speak_text)(text.as_ptr()) };
        if code != 0 {
            warn!(code, "NVDA speakText failed");
        }
    }

    fn cancel(&self) {
        if self.is_running() {
            // SAFETY: no arguments
            unsafe {
                (self.cancel_speech)();
            }
        }
    }
}

type ZdsrInitTts = unsafe extern "system" fn(i32, *const u16, bool) -> i32;
type ZdsrSpeak = unsafe extern "system" fn(*const u16, bool) -> i32;
type ZdsrStopSpeak = unsafe extern "system" fn();

pub struct ZdsrClient {
    speak: ZdsrSpeak,
    stop_speak: ZdsrStopSpeak,
    _lib: Library,
}

impl ZdsrClient {
    pub fn load(dir: &Path) -> Option<Self> {
        let file = if cfg!(target_pointer_width = "64") {
            "ZDSRAPI_x64.dll"
        } else {
            "ZDSRAPI.dll"
        };
        let lib = Library::load(&dir.join(file))?;

        // SAFETY: signatures from the ZDSR TTS API
        let (init, speak, stop_speak) = unsafe {
            (
                lib.symbol::<ZdsrInitTts>(b"InitTTS\0")?,
                lib.symbol::<ZdsrSpeak>(b"Speak\0")?,
                lib.symbol::<ZdsrStopSpeak>(b"StopSpeak\0")?,
            )
        };

        // screen reader channel, no channel name, interrupt on key down
        // SAFETY: a null channel name is allowed for the reader channel
        let code = unsafe { init(0, std::ptr::null(), true) };
        match code {
            0 => {
                info!("ZDSR TTS initialized");
                Some(Self {
                    speak,
                    stop_speak,
                    _lib: lib,
                })
            }
            1 => {
                warn!("ZDSR TTS version mismatch");
                None
            }
            code => {
                warn!(code, "ZDSR TTS initialization failed");
                None
            }
        }
    }
}

impl ScreenReader for ZdsrClient {
    fn name(&self) -> &'static str {
        "zdsr"
    }

    fn is_running(&self) -> bool {
        true
    }

    fn speak(&self, text: &str) {
        let text = wide(OsStr::new(text));
        // SAFETY: NUL-terminated UTF-16 that outlives the call
        match unsafe { (self.speak)(text.as_ptr(), true) } {
            0 => {}
            2 => debug!("ZDSR not running or not licensed"),
            code => warn!(code, "ZDSR speak failed"),
        }
    }

    fn cancel(&self) {
        // SAFETY: no arguments
        unsafe { (self.stop_speak)() }
    }
}
