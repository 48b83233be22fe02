//! Psalm texts for prompt building
//!
//! Reads `psalm_NNN.json` files (`{"verses": [{"v": 1, "text_he": "..."}]}`)
//! produced by the separate fetch step.

use crate::error::{Error, Result};
use crate::pair::in_universe;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct PsalmFile {
    #[serde(default)]
    verses: Vec<Verse>,
}

#[derive(Debug, Deserialize)]
struct Verse {
    #[serde(default)]
    v: u32,
    #[serde(default)]
    text_he: String,
}

/// Directory of psalm JSON files with a per-psalm formatting cache.
#[derive(Debug)]
pub struct Corpus {
    dir: PathBuf,
    cache: RefCell<HashMap<i32, String>>,
}

impl Corpus {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, psalm: i32) -> PathBuf {
        self.dir.join(format!("psalm_{:03}.json", psalm))
    }

    /// `Psalm N` heading followed by one numbered line per verse.
    pub fn format_psalm(&self, psalm: i32) -> Result<String> {
        if let Some(text) = self.cache.borrow().get(&psalm) {
            return Ok(text.clone());
        }
        if !in_universe(psalm) {
            return Err(Error::Corpus(format!("Psalm {} is outside the Psalter", psalm)));
        }

        let path = self.path_for(psalm);
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::Corpus(format!("Could not read {}: {}", path.display(), e)))?;
        let file: PsalmFile = serde_json::from_str(&contents)
            .map_err(|e| Error::Corpus(format!("Could not parse {}: {}", path.display(), e)))?;

        let mut lines = vec![format!("Psalm {}", psalm)];
        lines.extend(
            file.verses
                .iter()
                .map(|verse| format!("{}. {}", verse.v, verse.text_he)),
        );
        let text = lines.join("\n");

        self.cache.borrow_mut().insert(psalm, text.clone());
        Ok(text)
    }

    /// Psalm numbers with a file present, ascending.
    pub fn available(&self) -> Vec<i32> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut numbers: Vec<i32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_prefix("psalm_")
                    .and_then(|rest| rest.strip_suffix(".json"))
                    .and_then(|n| n.parse().ok())
            })
            .collect();
        numbers.sort_unstable();
        numbers
    }
}
