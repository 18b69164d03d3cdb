//! K-way merge of sorted block files.
//!
//! Each input is read one line at a time through a cursor, and a min-heap
//! always yields the smallest pending key, so memory stays proportional to
//! the number of blocks rather than to their size. Dictionaries are merged by
//! collated name, indexes by term ID.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::builder::{BlockFiles, BlockIndex};
use crate::collation::Collation;
use crate::dictionary::parse_dictionary_line;
use crate::error::{Error, Result};
use crate::intersect::union_sorted;
use crate::inverted::{parse_postings_line, write_postings_line, PostingValue};
use crate::positional::{parse_positional_line, write_positional_line, PositionalPosting};
use crate::TermId;

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexMerger {
    collation: Collation,
}

impl IndexMerger {
    pub fn new(collation: Collation) -> Self {
        Self { collation }
    }

    /// Merges block dictionaries into one sorted dictionary.
    ///
    /// A name carrying different IDs in different blocks, or two names
    /// sharing one ID, aborts the merge with a collision.
    pub fn merge_dictionaries(&self, inputs: &[PathBuf], output: &Path) -> Result<usize> {
        let collation = self.collation;
        let mut out = BufWriter::new(File::create(output)?);
        let mut owners: HashMap<TermId, String> = HashMap::new();
        let written = kway_merge(
            inputs,
            |line| {
                let (id, name) = parse_dictionary_line(line)?;
                Some((
                    CollatedName {
                        collation,
                        name: name.to_string(),
                    },
                    id,
                ))
            },
            |key, ids| {
                let Some(&id) = ids.first() else {
                    return Ok(());
                };
                if let Some(&other) = ids.iter().find(|&&other| other != id) {
                    return Err(Error::DuplicateTermIdCollision {
                        term_id: other,
                        existing: format!("{} (id {id})", key.name),
                        incoming: key.name.clone(),
                    });
                }
                if let Some(existing) = owners.insert(id, key.name.clone()) {
                    return Err(Error::DuplicateTermIdCollision {
                        term_id: id,
                        existing,
                        incoming: key.name.clone(),
                    });
                }
                writeln!(out, "{} {}", id, key.name)?;
                Ok(())
            },
        )?;
        out.flush()?;
        Ok(written)
    }

    /// Merges postings files; lists for the same term are unioned.
    pub fn merge_postings<V: PostingValue>(&self, inputs: &[PathBuf], output: &Path) -> Result<usize> {
        let mut out = BufWriter::new(File::create(output)?);
        let written = kway_merge(inputs, parse_postings_line::<V>, |term_id, lists| {
            let merged = lists
                .iter()
                .fold(Vec::new(), |acc: Vec<V>, list| union_sorted(&acc, list));
            write_postings_line(&mut out, *term_id, &merged)?;
            Ok(())
        })?;
        out.flush()?;
        Ok(written)
    }

    /// Merges positional files. A document present in several blocks has its
    /// positions unioned.
    pub fn merge_positional(&self, inputs: &[PathBuf], output: &Path) -> Result<usize> {
        let mut out = BufWriter::new(File::create(output)?);
        let written = kway_merge(inputs, parse_positional_line, |term_id, lists| {
            let mut all: Vec<PositionalPosting> = lists.into_iter().flatten().collect();
            all.sort_by_key(|p| p.doc_id);
            let mut merged: Vec<PositionalPosting> = Vec::with_capacity(all.len());
            for posting in all {
                match merged.last_mut() {
                    Some(last) if last.doc_id == posting.doc_id => {
                        last.positions = union_sorted(&last.positions, &posting.positions);
                    }
                    _ => merged.push(posting),
                }
            }
            write_positional_line(&mut out, *term_id, &merged)?;
            Ok(())
        })?;
        out.flush()?;
        Ok(written)
    }

    /// Merges every block of a pass into `output`, all or nothing.
    ///
    /// Both files are written as `*.partial` and renamed into place only once
    /// both merges succeed. Block files are deleted afterwards; on failure
    /// the partial files are removed and the blocks left to the caller.
    pub fn merge_pass<I: BlockIndex>(&self, blocks: &[BlockFiles], output: &BlockFiles) -> Result<()> {
        let dictionaries: Vec<PathBuf> = blocks.iter().map(|b| b.dictionary.clone()).collect();
        let indexes: Vec<PathBuf> = blocks.iter().map(|b| b.index.clone()).collect();
        let partial = BlockFiles {
            dictionary: partial_path(&output.dictionary),
            index: partial_path(&output.index),
        };

        let merged = self
            .merge_dictionaries(&dictionaries, &partial.dictionary)
            .and_then(|terms| I::merge_sorted(self, &indexes, &partial.index).map(|lines| (terms, lines)));
        let (terms, lines) = match merged {
            Ok(counts) => counts,
            Err(err) => {
                warn!(%err, output = %output.dictionary.display(), "merge failed");
                partial.remove();
                return Err(err);
            }
        };

        fs::rename(&partial.dictionary, &output.dictionary).inspect_err(|_| partial.remove())?;
        if let Err(err) = fs::rename(&partial.index, &output.index) {
            fs::remove_file(&output.dictionary).ok();
            partial.remove();
            return Err(err.into());
        }
        for block in blocks {
            block.remove();
        }
        info!(
            blocks = blocks.len(),
            terms,
            index_lines = lines,
            dictionary = %output.dictionary.display(),
            "merged blocks"
        );
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

/// Dictionary merge key: a name ordered by the dictionary's collation.
#[derive(Debug, Clone)]
struct CollatedName {
    collation: Collation,
    name: String,
}

impl PartialEq for CollatedName {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CollatedName {}

impl PartialOrd for CollatedName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CollatedName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.collation.compare(&self.name, &other.name)
    }
}

struct LineCursor {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl LineCursor {
    fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(File::open(path)?).lines(),
            line: 0,
        })
    }

    fn next_record<T>(&mut self, parse: impl Fn(&str) -> Option<T>) -> Result<Option<T>> {
        let Some(line) = self.lines.next() else {
            return Ok(None);
        };
        let line = line?;
        self.line += 1;
        parse(&line)
            .map(Some)
            .ok_or_else(|| Error::malformed(&self.path, self.line, "unparsable line"))
    }
}

/// Streams the inputs in key order. `emit` receives each distinct key once,
/// with the values of every input holding it, in input order. Returns the
/// number of keys emitted.
fn kway_merge<K, T, P, E>(inputs: &[PathBuf], parse: P, mut emit: E) -> Result<usize>
where
    K: Ord,
    P: Fn(&str) -> Option<(K, T)>,
    E: FnMut(&K, Vec<T>) -> Result<()>,
{
    let mut cursors = inputs
        .iter()
        .map(|p| LineCursor::open(p))
        .collect::<Result<Vec<_>>>()?;
    let mut pending: Vec<Option<T>> = Vec::with_capacity(cursors.len());
    let mut heap = BinaryHeap::with_capacity(cursors.len());
    for (block, cursor) in cursors.iter_mut().enumerate() {
        match cursor.next_record(&parse)? {
            Some((key, value)) => {
                heap.push(Reverse((key, block)));
                pending.push(Some(value));
            }
            None => pending.push(None),
        }
    }

    let mut emitted = 0;
    while let Some(Reverse((key, first))) = heap.pop() {
        let mut group = vec![first];
        while heap.peek().is_some_and(|Reverse((next, _))| *next == key) {
            if let Some(Reverse((_, block))) = heap.pop() {
                group.push(block);
            }
        }
        group.sort_unstable();

        let mut values = Vec::with_capacity(group.len());
        for block in group {
            values.extend(pending[block].take());
            let cursor = &mut cursors[block];
            if let Some((next, value)) = cursor.next_record(&parse)? {
                if next <= key {
                    return Err(Error::malformed(&cursor.path, cursor.line, "keys not ascending"));
                }
                pending[block] = Some(value);
                heap.push(Reverse((next, block)));
            }
        }
        emit(&key, values)?;
        emitted += 1;
    }
    debug!(inputs = inputs.len(), keys = emitted, "k-way merge finished");
    Ok(emitted)
}
