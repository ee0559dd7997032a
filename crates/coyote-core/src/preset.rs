//! Named waveform presets: built-ins plus `.pulse` files from a directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::codec::parse_dungeonlab_pulse;
use crate::types::PulseOperation;

/// Extension of DungeonLab export files picked up by [`PresetRegistry::load_dir`].
pub const PULSE_FILE_EXTENSION: &str = "pulse";

#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: HashMap<String, Vec<PulseOperation>>,
}

impl PresetRegistry {
    /// Empty registry without built-ins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in presets `steady`, `pulse` and `wave`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Constant output, useful to check the electrodes.
        registry.insert("steady", vec![PulseOperation::new([80; 4], [80; 4])]);
        registry.insert(
            "pulse",
            vec![PulseOperation::new([120, 60, 120, 60], [90, 30, 90, 30])],
        );
        registry.insert(
            "wave",
            vec![PulseOperation::new([40, 80, 40, 80], [30, 70, 30, 70])],
        );
        registry
    }

    /// Register a preset, returning the one it replaced.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        pulses: Vec<PulseOperation>,
    ) -> Option<Vec<PulseOperation>> {
        self.presets.insert(name.into(), pulses)
    }

    /// Look a preset up by name. Exact match first, then case-insensitive.
    pub fn get(&self, name: &str) -> Option<&[PulseOperation]> {
        let name = name.trim();
        if let Some(pulses) = self.presets.get(name) {
            return Some(pulses);
        }
        // Names differing only in case resolve to the lexicographically first.
        self.presets
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, v)| v.as_slice())
    }

    /// Preset names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.presets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Merge every `*.pulse` file in `dir` into the registry, keyed by file stem.
    ///
    /// Files are visited in sorted path order and later entries replace
    /// earlier ones (including built-ins). Unreadable files and files that
    /// parse to nothing are skipped. A missing directory loads nothing.
    /// Returns the number of presets registered.
    pub fn load_dir(&mut self, dir: &Path) -> usize {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "preset directory not readable");
                return 0;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(PULSE_FILE_EXTENSION))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable preset");
                    continue;
                }
            };
            let pulses = parse_dungeonlab_pulse(text.trim());
            if pulses.is_empty() {
                tracing::debug!(path = %path.display(), "preset file produced no pulses");
                continue;
            }
            if self.insert(name, pulses).is_some() {
                tracing::info!(preset = %name, "preset file overrides an existing preset");
            }
            loaded += 1;
        }
        loaded
    }
}
