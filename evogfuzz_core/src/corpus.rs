use crate::input::{Input, Origin};
use crate::oracle::OracleResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the JSON index written next to exported inputs.
pub const INDEX_FILENAME: &str = "corpus_index.json";
const INPUT_FILE_EXTENSION: &str = "input";

/// Defines errors that can arise during corpus operations.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The requested input ID was not found within the corpus.
    #[error("Input ID {0} not found in corpus")]
    InputNotFound(usize),

    /// An I/O error occurred while exporting the corpus or reading seed files.
    #[error("Corpus I/O error: {0}")]
    Io(String),

    #[error("Corpus serialization error: {0}")]
    Serialization(String),

    /// A seed file could not be turned into a string.
    #[error("Corpus deserialization error: {0}")]
    Deserialization(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}
impl From<serde_json::Error> for CorpusError {
    fn from(err: serde_json::Error) -> Self {
        CorpusError::Serialization(format!("JSON operation error: {}", err))
    }
}

/// MD5 hex digest of a rendered input.
pub fn input_hash(rendered: &str) -> String {
    format!("{:x}", md5::compute(rendered.as_bytes()))
}

/// The history of every input the engine has evaluated.
///
/// A corpus is append-only and keyed by rendered string: adding an input
/// whose rendering is already present keeps the first entry and returns its
/// ID. IDs are assigned in discovery order starting from zero.
pub trait Corpus: Send {
    /// Adds `input` unless an input with the same rendering exists.
    ///
    /// Returns the ID of the stored entry and whether it was newly inserted.
    fn add(&mut self, input: Input) -> Result<(usize, bool), CorpusError>;

    fn get(&self, id: usize) -> Option<&Input>;

    /// Looks up an input by its rendered string.
    fn find(&self, rendered: &str) -> Option<usize>;

    /// All entries in discovery order.
    fn inputs(&self) -> &[Input];

    fn len(&self) -> usize {
        self.inputs().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory `Corpus` indexed by the MD5 digest of each rendering.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    entries: Vec<Input>,
    by_hash: HashMap<String, Vec<usize>>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Input)> {
        self.entries.iter().enumerate()
    }
}

impl Corpus for InMemoryCorpus {
    fn add(&mut self, input: Input) -> Result<(usize, bool), CorpusError> {
        if let Some(id) = self.find(input.as_str()) {
            return Ok((id, false));
        }
        let id = self.entries.len();
        self.by_hash
            .entry(input_hash(input.as_str()))
            .or_default()
            .push(id);
        self.entries.push(input);
        Ok((id, true))
    }

    fn get(&self, id: usize) -> Option<&Input> {
        self.entries.get(id)
    }

    fn find(&self, rendered: &str) -> Option<usize> {
        // The digest narrows the search; the string comparison settles collisions.
        self.by_hash
            .get(&input_hash(rendered))?
            .iter()
            .copied()
            .find(|&id| self.entries[id].as_str() == rendered)
    }

    fn inputs(&self) -> &[Input] {
        &self.entries
    }
}

/// One line of the exported JSON index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CorpusIndexEntry {
    pub id: usize,
    pub hash: String,
    /// Path of the input file, relative to the export directory.
    pub file: String,
    pub origin: Origin,
    pub generation: usize,
    pub fitness: f64,
    pub oracle: Option<OracleResult>,
    pub failing: bool,
}

/// Writes every input of `corpus` to `dir/inputs/`, copies the failing ones to
/// `dir/failing/`, and writes an index of all entries to
/// `dir/corpus_index.json`. File names are the MD5 digest of the input.
///
/// Returns the number of input files written. Fails with
/// [`CorpusError::InputNotFound`] before writing anything if a failing ID
/// is not in the corpus.
pub fn export_corpus(corpus: &dyn Corpus, failing: &[usize], dir: &Path) -> Result<usize, CorpusError> {
    if let Some(&missing) = failing.iter().find(|&&id| corpus.get(id).is_none()) {
        return Err(CorpusError::InputNotFound(missing));
    }

    let inputs_dir = dir.join("inputs");
    let failing_dir = dir.join("failing");
    for sub_dir in [&inputs_dir, &failing_dir] {
        fs::create_dir_all(sub_dir).map_err(|e| {
            CorpusError::Io(format!("Failed to create export directory {:?}: {}", sub_dir, e))
        })?;
    }

    let mut index = Vec::with_capacity(corpus.len());
    for (id, input) in corpus.inputs().iter().enumerate() {
        let hash = input_hash(input.as_str());
        let file_name = Path::new(&hash).with_extension(INPUT_FILE_EXTENSION);
        let file_path = inputs_dir.join(&file_name);
        fs::write(&file_path, input.as_str()).map_err(|e| {
            CorpusError::Io(format!("Failed to write input file {:?}: {}", file_path, e))
        })?;

        let is_failing = failing.contains(&id);
        if is_failing {
            let failing_path = failing_dir.join(&file_name);
            fs::write(&failing_path, input.as_str()).map_err(|e| {
                CorpusError::Io(format!("Failed to write input file {:?}: {}", failing_path, e))
            })?;
        }

        index.push(CorpusIndexEntry {
            id,
            file: format!("inputs/{}", file_name.display()),
            hash,
            origin: input.origin(),
            generation: input.generation(),
            fitness: input.fitness(),
            oracle: input.oracle(),
            failing: is_failing,
        });
    }

    let index_path = dir.join(INDEX_FILENAME);
    let file = File::create(&index_path).map_err(|e| {
        CorpusError::Io(format!("Failed to create index file {:?}: {}", index_path, e))
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), &index).map_err(|e| {
        CorpusError::Serialization(format!(
            "Failed to serialize corpus index to JSON for {:?}: {}",
            index_path, e
        ))
    })?;
    Ok(index.len())
}

/// Reads seed strings from files and directories, one seed per file.
///
/// Directories are read one level deep in file-name order; hidden files and
/// corpus index files are skipped. Seed files must be valid UTF-8.
pub fn load_seed_files(seed_paths: &[PathBuf]) -> Result<Vec<String>, CorpusError> {
    let mut seeds = Vec::new();
    for path_buf in seed_paths {
        let path_ref = path_buf.as_path();
        if path_ref.is_file() {
            seeds.push(read_seed(path_ref)?);
        } else if path_ref.is_dir() {
            let mut files = Vec::new();
            for entry_result in fs::read_dir(path_ref).map_err(|e| {
                CorpusError::Io(format!("Failed to read seed directory {:?}: {}", path_ref, e))
            })? {
                let entry = entry_result.map_err(|e| {
                    CorpusError::Io(format!("Error reading entry in seed directory {:?}: {}", path_ref, e))
                })?;
                let file_path_in_dir = entry.path();
                if !file_path_in_dir.is_file() {
                    continue;
                }
                if let Some(filename_str) = file_path_in_dir.file_name().and_then(|name| name.to_str()) {
                    if filename_str == INDEX_FILENAME || filename_str.starts_with('.') {
                        continue;
                    }
                }
                files.push(file_path_in_dir);
            }
            files.sort();
            for file in files {
                seeds.push(read_seed(&file)?);
            }
        } else {
            return Err(CorpusError::Io(format!("Seed path {:?} does not exist", path_ref)));
        }
    }
    Ok(seeds)
}

fn read_seed(path: &Path) -> Result<String, CorpusError> {
    let bytes = fs::read(path)
        .map_err(|e| CorpusError::Io(format!("Failed to read seed file {:?}: {}", path, e)))?;
    String::from_utf8(bytes).map_err(|e| {
        CorpusError::Deserialization(format!("Seed file {:?} is not valid UTF-8: {}", path, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;
    use crate::parser::EarleyParser;
    use tempfile::tempdir;

    fn make_input(text: &str, verdict: OracleResult) -> Input {
        let grammar = Grammar::new(
            "<start>",
            vec![("<start>", vec!["<c>", "<c><start>"]), ("<c>", vec!["a", "b", "-"])],
        )
        .unwrap();
        let tree = EarleyParser::new(&grammar).parse(text).unwrap();
        let mut input = Input::new(tree, Origin::Mutation, 2);
        input.set_oracle(verdict);
        input
    }

    #[test]
    fn in_memory_corpus_deduplicates_by_rendering() {
        let mut corpus = InMemoryCorpus::new();
        assert!(corpus.is_empty());

        assert_eq!(corpus.add(make_input("ab", OracleResult::Passing)).unwrap(), (0, true));
        assert_eq!(corpus.add(make_input("ba", OracleResult::Failing)).unwrap(), (1, true));
        assert_eq!(corpus.add(make_input("ab", OracleResult::Failing)).unwrap(), (0, false));

        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.get(0).unwrap().oracle(), Some(OracleResult::Passing));
        assert_eq!(corpus.find("ba"), Some(1));
        assert_eq!(corpus.find("aa"), None);
        assert!(corpus.get(2).is_none());
        let rendered: Vec<&str> = corpus.iter().map(|(_, i)| i.as_str()).collect();
        assert_eq!(rendered, vec!["ab", "ba"]);
    }

    #[test]
    fn export_writes_inputs_failing_and_index() -> Result<(), CorpusError> {
        let dir = tempdir()?;
        let mut corpus = InMemoryCorpus::new();
        corpus.add(make_input("ab", OracleResult::Passing))?;
        corpus.add(make_input("-a", OracleResult::Failing))?;

        let written = export_corpus(&corpus, &[1], dir.path())?;
        assert_eq!(written, 2);

        let failing_file = dir
            .path()
            .join("failing")
            .join(format!("{}.input", input_hash("-a")));
        assert_eq!(fs::read_to_string(failing_file)?, "-a");
        assert_eq!(fs::read_dir(dir.path().join("inputs"))?.count(), 2);
        assert_eq!(fs::read_dir(dir.path().join("failing"))?.count(), 1);

        let index: Vec<CorpusIndexEntry> =
            serde_json::from_reader(File::open(dir.path().join(INDEX_FILENAME))?)?;
        assert_eq!(index.len(), 2);
        assert!(!index[0].failing);
        assert!(index[1].failing);
        assert_eq!(index[1].oracle, Some(OracleResult::Failing));
        assert_eq!(index[1].origin, Origin::Mutation);
        assert_eq!(index[1].file, format!("inputs/{}.input", input_hash("-a")));
        Ok(())
    }

    #[test]
    fn export_rejects_unknown_failing_id() -> Result<(), CorpusError> {
        let dir = tempdir()?;
        let mut corpus = InMemoryCorpus::new();
        corpus.add(make_input("ab", OracleResult::Failing))?;

        let out = dir.path().join("out");
        assert!(matches!(
            export_corpus(&corpus, &[0, 4], &out),
            Err(CorpusError::InputNotFound(4))
        ));
        assert!(!out.exists());
        Ok(())
    }

    #[test]
    fn load_seed_files_reads_files_and_directories() -> Result<(), CorpusError> {
        let dir = tempdir()?;
        let seed_dir = dir.path().join("seeds");
        fs::create_dir(&seed_dir)?;
        fs::write(seed_dir.join("b_seed"), "cos(2)")?;
        fs::write(seed_dir.join("a_seed"), "sqrt(1)")?;
        fs::write(seed_dir.join(".hidden"), "ignored")?;
        fs::write(seed_dir.join(INDEX_FILENAME), "[]")?;
        let single = dir.path().join("single");
        fs::write(&single, "tan(3)")?;

        let seeds = load_seed_files(&[single, seed_dir])?;
        assert_eq!(seeds, vec!["tan(3)", "sqrt(1)", "cos(2)"]);
        Ok(())
    }

    #[test]
    fn load_seed_files_rejects_missing_and_binary_files() -> Result<(), CorpusError> {
        let dir = tempdir()?;
        let missing = dir.path().join("nope");
        assert!(matches!(load_seed_files(&[missing]), Err(CorpusError::Io(_))));

        let binary = dir.path().join("binary");
        fs::write(&binary, [0xff, 0xfe, 0x00])?;
        assert!(matches!(
            load_seed_files(&[binary]),
            Err(CorpusError::Deserialization(_))
        ));
        Ok(())
    }
}
