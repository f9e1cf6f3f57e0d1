//! Persisted action -> chord bindings
//!
//! The store is the single writer of the bindings file. Every successful
//! mutation is saved immediately and publishes a freshly built
//! [`HotkeyRegistry`] to the key listener.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use super::chord::{Chord, ChordError};
use super::conflict::ConflictProbe;
use super::registry::HotkeyRegistry;
use crate::events::ErrorKind;

/// Every action a hotkey can be bound to, in UI order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotkeyAction {
    ToggleMonitor,
    ToggleVisibility,
    #[serde(rename = "exit_application")]
    Exit,
    TogglePlayPause,
    FastForward,
    Rewind,
    AddLabel,
    SearchLabel,
}

impl HotkeyAction {
    pub const ALL: [HotkeyAction; 8] = [
        HotkeyAction::ToggleMonitor,
        HotkeyAction::ToggleVisibility,
        HotkeyAction::Exit,
        HotkeyAction::TogglePlayPause,
        HotkeyAction::FastForward,
        HotkeyAction::Rewind,
        HotkeyAction::AddLabel,
        HotkeyAction::SearchLabel,
    ];

    /// Key used in the bindings file
    pub fn config_name(self) -> &'static str {
        match self {
            HotkeyAction::ToggleMonitor => "toggle_monitor",
            HotkeyAction::ToggleVisibility => "toggle_visibility",
            HotkeyAction::Exit => "exit_application",
            HotkeyAction::TogglePlayPause => "toggle_play_pause",
            HotkeyAction::FastForward => "fast_forward",
            HotkeyAction::Rewind => "rewind",
            HotkeyAction::AddLabel => "add_label",
            HotkeyAction::SearchLabel => "search_label",
        }
    }

    pub fn from_config_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.config_name() == name)
    }

    /// Label shown by the settings UI
    pub fn display_name(self) -> &'static str {
        match self {
            HotkeyAction::ToggleMonitor => "Start/stop monitoring",
            HotkeyAction::ToggleVisibility => "Hide/show window",
            HotkeyAction::Exit => "Exit",
            HotkeyAction::TogglePlayPause => "Play/pause",
            HotkeyAction::FastForward => "Fast forward",
            HotkeyAction::Rewind => "Rewind",
            HotkeyAction::AddLabel => "Add label",
            HotkeyAction::SearchLabel => "Search labels",
        }
    }

    /// Binding installed by `reset_to_defaults`
    fn default_chord(self) -> &'static str {
        match self {
            HotkeyAction::ToggleMonitor => "ctrl+alt+shift+t",
            HotkeyAction::ToggleVisibility => "ctrl+alt+shift+v",
            HotkeyAction::Exit => "ctrl+alt+shift+q",
            HotkeyAction::TogglePlayPause => "ctrl+alt+p",
            HotkeyAction::FastForward => "ctrl+alt+right",
            HotkeyAction::Rewind => "ctrl+alt+left",
            HotkeyAction::AddLabel => "ctrl+alt+a",
            HotkeyAction::SearchLabel => "ctrl+alt+s",
        }
    }
}

impl fmt::Display for HotkeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

/// Errors returned by binding updates
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("invalid chord: {0}")]
    InvalidChord(#[from] ChordError),

    #[error("chord `{chord}` is already bound to `{}`", owner.display_name())]
    ChordConflict { chord: String, owner: HotkeyAction },

    #[error("chord `{0}` is already used by another program")]
    SystemConflict(String),

    #[error("failed to persist hotkey bindings to {path}: {reason}")]
    PersistFailure { path: PathBuf, reason: String },
}

impl BindingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BindingError::InvalidChord(_) => ErrorKind::InvalidChord,
            BindingError::ChordConflict { .. } => ErrorKind::ChordConflict,
            BindingError::SystemConflict(_) => ErrorKind::SystemConflict,
            BindingError::PersistFailure { .. } => ErrorKind::BindingPersistFailure,
        }
    }
}

/// Result of a successful update; the new binding is live even if it
/// could not be written to disk.
#[derive(Debug)]
pub struct UpdateOutcome {
    pub chord: Chord,
    pub persist_error: Option<BindingError>,
}

/// Owns the action -> chord map and its file
pub struct BindingStore {
    path: PathBuf,
    bindings: BTreeMap<HotkeyAction, Chord>,
    probe: Box<dyn ConflictProbe>,
    registry_tx: watch::Sender<Arc<HotkeyRegistry>>,
}

impl BindingStore {
    /// Load bindings from `path`, reconcile them against the defined
    /// actions and write the reconciled map back.
    pub fn load(path: impl Into<PathBuf>, probe: Box<dyn ConflictProbe>) -> Self {
        let path = path.into();
        let persisted = read_bindings_file(&path);

        let mut bindings = BTreeMap::new();
        let mut owners: HashMap<String, HotkeyAction> = HashMap::new();

        for action in HotkeyAction::ALL {
            let chord = match persisted.get(action.config_name()) {
                None => {
                    info!(%action, "no persisted binding, starting unbound");
                    Chord::empty()
                }
                Some(raw) => match Chord::parse(raw) {
                    Ok(chord) => chord,
                    Err(e) => {
                        warn!(%action, chord = %raw, error = %e, "invalid persisted chord, resetting to unbound");
                        Chord::empty()
                    }
                },
            };

            let chord = if chord.is_empty() {
                chord
            } else {
                match owners.get(&chord.to_string()) {
                    Some(owner) => {
                        warn!(%action, %owner, %chord, "duplicate persisted chord, resetting to unbound");
                        Chord::empty()
                    }
                    None => {
                        owners.insert(chord.to_string(), action);
                        chord
                    }
                }
            };

            bindings.insert(action, chord);
        }

        for name in persisted.keys() {
            if HotkeyAction::from_config_name(name).is_none() {
                info!(action = %name, "dropping binding for retired action");
            }
        }

        let registry = HotkeyRegistry::from_bindings(bindings.iter().map(|(a, c)| (*a, c)));
        let (registry_tx, _) = watch::channel(Arc::new(registry));

        let store = Self {
            path,
            bindings,
            probe,
            registry_tx,
        };

        if let Err(e) = store.save() {
            warn!(error = %e, "bindings stay in memory for this session");
        }

        store
    }

    /// Write the full map to disk
    pub fn save(&self) -> Result<(), BindingError> {
        let map: BTreeMap<&str, String> = self
            .bindings
            .iter()
            .map(|(action, chord)| (action.config_name(), chord.to_string()))
            .collect();

        let persist_err = |reason: String| BindingError::PersistFailure {
            path: self.path.clone(),
            reason,
        };

        let json = serde_json::to_vec_pretty(&map).map_err(|e| persist_err(e.to_string()))?;
        write_atomic(&self.path, &json).map_err(|e| persist_err(e.to_string()))?;

        info!(path = %self.path.display(), "hotkey bindings saved");
        Ok(())
    }

    /// Bind `action` to the chord formed by the given UI selections
    pub fn update<I, S>(
        &mut self,
        action: HotkeyAction,
        modifiers: I,
        key: &str,
    ) -> Result<UpdateOutcome, BindingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let chord = Chord::from_parts(modifiers, key)?;
        self.update_chord(action, chord)
    }

    /// Bind `action` to an already normalized chord
    pub fn update_chord(
        &mut self,
        action: HotkeyAction,
        chord: Chord,
    ) -> Result<UpdateOutcome, BindingError> {
        if !chord.is_empty() {
            if let Some((owner, _)) = self
                .bindings
                .iter()
                .find(|(other, existing)| **other != action && **existing == chord)
            {
                return Err(BindingError::ChordConflict {
                    chord: chord.to_string(),
                    owner: *owner,
                });
            }

            let unchanged = self.bindings.get(&action) == Some(&chord);
            if !unchanged && self.probe.is_claimed(&chord) == Some(true) {
                return Err(BindingError::SystemConflict(chord.to_string()));
            }
        }

        self.bindings.insert(action, chord.clone());
        info!(%action, chord = %chord, "hotkey binding updated");

        let persist_error = self.save().err();
        if let Some(e) = &persist_error {
            warn!(error = %e, "binding change kept in memory only");
        }
        self.publish_registry();

        Ok(UpdateOutcome {
            chord,
            persist_error,
        })
    }

    /// Replace every binding with the defaults
    pub fn reset_to_defaults(&mut self) -> Result<(), BindingError> {
        self.bindings = default_bindings();
        info!("hotkey bindings reset to defaults");
        let result = self.save();
        self.publish_registry();
        result
    }

    pub fn chord_for(&self, action: HotkeyAction) -> Chord {
        self.bindings.get(&action).cloned().unwrap_or_default()
    }

    /// All bindings in UI order
    pub fn bindings(&self) -> impl Iterator<Item = (HotkeyAction, &Chord)> {
        self.bindings.iter().map(|(a, c)| (*a, c))
    }

    /// Receive every rebuilt registry
    pub fn subscribe(&self) -> watch::Receiver<Arc<HotkeyRegistry>> {
        self.registry_tx.subscribe()
    }

    fn publish_registry(&self) {
        let registry = HotkeyRegistry::from_bindings(self.bindings());
        self.registry_tx.send_replace(Arc::new(registry));
    }
}

fn default_bindings() -> BTreeMap<HotkeyAction, Chord> {
    HotkeyAction::ALL
        .into_iter()
        .map(|action| {
            let chord = Chord::parse(action.default_chord()).unwrap_or_default();
            (action, chord)
        })
        .collect()
}

/// Read the raw name -> chord map. Missing or corrupt files read as empty;
/// a corrupt file is moved aside first.
fn read_bindings_file(path: &Path) -> HashMap<String, String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "bindings file missing");
            return HashMap::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read bindings file");
            return HashMap::new();
        }
    };

    match serde_json::from_slice::<HashMap<String, String>>(&bytes) {
        Ok(map) => {
            info!(path = %path.display(), count = map.len(), "bindings file loaded");
            map
        }
        Err(e) => {
            let backup = backup_path(path);
            warn!(path = %path.display(), error = %e, backup = %backup.display(), "corrupt bindings file");
            if let Err(e) = fs::rename(path, &backup) {
                warn!(error = %e, "failed to back up corrupt bindings file");
            }
            HashMap::new()
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = PathBuf::from(tmp_name);

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::conflict::NoProbe;

    struct ClaimedProbe(&'static str);

    impl ConflictProbe for ClaimedProbe {
        fn is_claimed(&self, chord: &Chord) -> Option<bool> {
            Some(chord.to_string() == self.0)
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> BindingStore {
        BindingStore::load(dir.path().join("hotkeys.json"), Box::new(NoProbe))
    }

    fn read_file(dir: &tempfile::TempDir) -> HashMap<String, String> {
        let bytes = fs::read(dir.path().join("hotkeys.json")).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_missing_file_creates_unbound_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.bindings().all(|(_, c)| c.is_empty()));
        let on_disk = read_file(&dir);
        assert_eq!(on_disk.len(), HotkeyAction::ALL.len());
        assert_eq!(on_disk["exit_application"], "");
    }

    #[test]
    fn test_load_reconciles_persisted_map() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("hotkeys.json"),
            r#"{
                "toggle_play_pause": "ctrl+alt+p",
                "rewind": "ctrl+shift",
                "fast_forward": "alt+ctrl+p",
                "legacy_action": "ctrl+alt+l"
            }"#,
        )
        .unwrap();

        let store = store_in(&dir);
        assert_eq!(store.chord_for(HotkeyAction::TogglePlayPause).to_string(), "alt+ctrl+p");
        // invalid chord reset
        assert!(store.chord_for(HotkeyAction::Rewind).is_empty());
        // duplicate of an earlier action reset
        assert!(store.chord_for(HotkeyAction::FastForward).is_empty());
        assert!(store.chord_for(HotkeyAction::AddLabel).is_empty());

        let on_disk = read_file(&dir);
        assert!(!on_disk.contains_key("legacy_action"));
        assert_eq!(on_disk["toggle_play_pause"], "alt+ctrl+p");
        assert_eq!(on_disk["rewind"], "");
    }

    #[test]
    fn test_corrupt_file_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hotkeys.json"), b"\x80not json").unwrap();

        let store = store_in(&dir);
        assert!(store.bindings().all(|(_, c)| c.is_empty()));
        assert!(dir.path().join("hotkeys.json.bak").exists());
        assert_eq!(read_file(&dir).len(), HotkeyAction::ALL.len());
    }

    #[test]
    fn test_update_persists_and_rebuilds_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let mut registry_rx = store.subscribe();

        let outcome = store
            .update(HotkeyAction::TogglePlayPause, ["Ctrl", "Alt"], "P")
            .unwrap();
        assert_eq!(outcome.chord.to_string(), "alt+ctrl+p");
        assert!(outcome.persist_error.is_none());

        assert!(registry_rx.has_changed().unwrap());
        let registry = registry_rx.borrow_and_update().clone();
        assert_eq!(registry.lookup("alt+ctrl+p"), Some(HotkeyAction::TogglePlayPause));
        assert_eq!(read_file(&dir)["toggle_play_pause"], "alt+ctrl+p");
    }

    #[test]
    fn test_modifiers_without_key_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        for mods in [vec!["Ctrl"], vec!["Alt", "Shift"], vec!["Win"]] {
            let err = store.update(HotkeyAction::Rewind, mods, "").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidChord);
        }
        assert!(store.chord_for(HotkeyAction::Rewind).is_empty());
    }

    #[test]
    fn test_conflicting_chord_names_owner_and_leaves_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update(HotkeyAction::AddLabel, ["Ctrl", "Alt"], "T").unwrap();
        let before: Vec<_> = store.bindings().map(|(a, c)| (a, c.clone())).collect();

        let err = store
            .update(HotkeyAction::SearchLabel, ["Alt", "Ctrl"], "t")
            .unwrap_err();
        match &err {
            BindingError::ChordConflict { owner, chord } => {
                assert_eq!(*owner, HotkeyAction::AddLabel);
                assert_eq!(chord, "alt+ctrl+t");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::ChordConflict);

        let after: Vec<_> = store.bindings().map(|(a, c)| (a, c.clone())).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_rebinding_same_action_is_not_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update(HotkeyAction::Rewind, ["Ctrl"], "Left").unwrap();
        assert!(store.update(HotkeyAction::Rewind, ["Ctrl"], "Left").is_ok());
    }

    #[test]
    fn test_system_conflict_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BindingStore::load(
            dir.path().join("hotkeys.json"),
            Box::new(ClaimedProbe("alt+ctrl+p")),
        );

        let err = store
            .update(HotkeyAction::TogglePlayPause, ["Ctrl", "Alt"], "P")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SystemConflict);
        assert!(store.chord_for(HotkeyAction::TogglePlayPause).is_empty());
    }

    #[test]
    fn test_clearing_skips_checks() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update(HotkeyAction::Exit, ["Ctrl"], "Q").unwrap();
        let outcome = store.update(HotkeyAction::Exit, Vec::<&str>::new(), "").unwrap();
        assert!(outcome.chord.is_empty());
        assert_eq!(read_file(&dir)["exit_application"], "");
    }

    #[test]
    fn test_reset_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let registry_rx = store.subscribe();
        store.reset_to_defaults().unwrap();

        assert_eq!(store.chord_for(HotkeyAction::ToggleMonitor).to_string(), "alt+ctrl+shift+t");
        assert_eq!(store.chord_for(HotkeyAction::FastForward).to_string(), "alt+ctrl+right");
        assert_eq!(registry_rx.borrow().len(), HotkeyAction::ALL.len());
        assert_eq!(read_file(&dir)["rewind"], "alt+ctrl+left");
    }

    #[test]
    fn test_persist_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the file should be makes every write fail
        let path = dir.path().join("hotkeys.json");
        fs::create_dir(&path).unwrap();

        let mut store = BindingStore::load(&path, Box::new(NoProbe));
        let outcome = store
            .update(HotkeyAction::TogglePlayPause, ["Ctrl"], "Space")
            .unwrap();
        let err = outcome.persist_error.expect("write should fail");
        assert_eq!(err.kind(), ErrorKind::BindingPersistFailure);
        assert_eq!(store.chord_for(HotkeyAction::TogglePlayPause).to_string(), "ctrl+space");
    }

    #[test]
    fn test_action_serde_names() {
        assert_eq!(serde_json::to_string(&HotkeyAction::Exit).unwrap(), "\"exit_application\"");
        let action: HotkeyAction = serde_json::from_str("\"fast_forward\"").unwrap();
        assert_eq!(action, HotkeyAction::FastForward);
        for action in HotkeyAction::ALL {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.config_name()));
        }
    }
}
