//! Caches Solidity source files by file name and by the compiler's numeric
//! source id, reading them lazily and computing a line-offset table so the
//! attribution engine can turn a byte offset into a line number.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
};

use indexmap::IndexMap;
use log::warn;
use solgas_types::bundle::CompilerBundle;

/// A single source file participating in attribution.
#[derive(Clone, Debug)]
pub struct Source {
    pub id: i64,
    pub file_name: String,
    /// Known but not reported (matched a configured skip substring).
    pub skip: bool,
    /// Absent when skipped or unreadable.
    pub text: Option<String>,
    /// Ascending byte offset of the start of each line; offset 0 for line 0.
    pub line_offsets: Option<Vec<usize>>,
    pub line_gas: HashMap<usize, i64>,
    pub lines_with_calls: HashSet<usize>,
}

impl Source {
    fn new(id: i64, file_name: String, skip: bool, text: Option<String>) -> Self {
        let line_offsets = text.as_ref().map(|t| compute_line_offsets(t));
        Source {
            id,
            file_name,
            skip,
            text,
            line_offsets,
            line_gas: HashMap::new(),
            lines_with_calls: HashSet::new(),
        }
    }

    /// The line whose offset is the largest one `<= s`, ties broken toward the
    /// lower index. `None` if the source has no text loaded.
    pub fn line_for_offset(&self, s: i64) -> Option<usize> {
        let offsets = self.line_offsets.as_ref()?;
        if s < 0 || offsets.is_empty() {
            return Some(0);
        }
        let s = s as usize;
        match offsets.binary_search(&s) {
            Ok(idx) => Some(idx),
            Err(0) => Some(0),
            Err(insert_at) => Some(insert_at - 1),
        }
    }

    /// Text of a single line, if the source text is loaded.
    pub fn line_text(&self, line: usize) -> Option<&str> {
        let text = self.text.as_ref()?;
        let offsets = self.line_offsets.as_ref()?;
        let start = *offsets.get(line)?;
        let end = offsets.get(line + 1).copied().unwrap_or(text.len());
        // Trailing '\r' on CRLF input is kept out of the slice but LF itself
        // was already excluded by the offset arithmetic.
        let slice = &text[start..end.min(text.len())];
        Some(slice.trim_end_matches('\r').trim_end_matches('\n'))
    }

    pub fn line_count(&self) -> usize {
        self.line_offsets.as_ref().map(|o| o.len()).unwrap_or(0)
    }

    pub fn add_gas(&mut self, line: usize, gas: i64) {
        *self.line_gas.entry(line).or_insert(0) += gas;
    }

    pub fn mark_call(&mut self, line: usize) {
        self.lines_with_calls.insert(line);
    }
}

/// offset 0 for line 0; subsequent offsets are `previous + previous_len + 1`.
/// Splits on LF only (CR, if present, is treated as part of the line content).
fn compute_line_offsets(text: &str) -> Vec<usize> {
    let mut offsets = vec![0usize];
    let mut offset = 0usize;
    for line in text.split('\n') {
        offset += line.len() + 1;
        offsets.push(offset);
    }
    offsets.pop(); // the final push is one past the last real line's start
    offsets
}

pub struct SourceRegistryConfig {
    pub skip_substrings: Vec<String>,
    pub src_root: PathBuf,
}

impl Default for SourceRegistryConfig {
    fn default() -> Self {
        SourceRegistryConfig {
            skip_substrings: Vec::new(),
            src_root: PathBuf::from("."),
        }
    }
}

/// Cache of [`Source`]s, addressable by numeric id (via the bundle's source
/// index) or by file name; both paths resolve to the same cached value.
pub struct SourceRegistry {
    config: SourceRegistryConfig,
    by_file_name: IndexMap<String, Source>,
}

impl SourceRegistry {
    pub fn new(config: SourceRegistryConfig) -> Self {
        SourceRegistry { config, by_file_name: IndexMap::new() }
    }

    /// Resolves a numeric source id to its Source, via the bundle's source
    /// index, creating and caching it on first sight. `None` if the bundle
    /// does not know this id.
    pub fn get_or_create_by_id(&mut self, bundle: &CompilerBundle, id: i64) -> Option<&mut Source> {
        let file_name = bundle.file_name_for_id(id)?.to_string();
        Some(self.get_or_create_by_file_name(&file_name, id))
    }

    pub fn get_or_create_by_file_name(&mut self, file_name: &str, id: i64) -> &mut Source {
        if !self.by_file_name.contains_key(file_name) {
            let config = &self.config;
            let skip = config.skip_substrings.iter().any(|needle| file_name.contains(needle.as_str()));
            let text = if skip { None } else { read_source_text(config, file_name) };
            self.by_file_name.insert(file_name.to_string(), Source::new(id, file_name.to_string(), skip, text));
        }
        self.by_file_name.get_mut(file_name).expect("just inserted")
    }

    /// Sources in insertion (first-referenced) order, for stable report output.
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.by_file_name.values()
    }
}

/// Resolves and reads a source file's text. Tries the configured source root
/// first, then a module-style lookup (mirroring Node's `node_modules`
/// resolution, for imports like `@openzeppelin/contracts/token/ERC20/ERC20.sol`).
/// A failed read is not fatal: `None` is returned and a warning logged.
fn read_source_text(config: &SourceRegistryConfig, file_name: &str) -> Option<String> {
    let candidates = [
        config.src_root.join(file_name),
        PathBuf::from(file_name),
        config.src_root.join("node_modules").join(file_name),
    ];
    for candidate in &candidates {
        if let Ok(text) = fs::read_to_string(candidate) {
            return Some(text);
        }
    }
    warn!(
        "could not read source {file_name} (tried {})",
        candidates.iter().map(|p: &PathBuf| p.display().to_string()).collect::<Vec<_>>().join(", ")
    );
    None
}
