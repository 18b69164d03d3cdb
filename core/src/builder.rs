//! Index construction, in one in-memory pass or through bounded blocks.
//!
//! Blocked construction folds at most `doc_limit` documents (or `word_limit`
//! dictionary words for the n-gram passes) into a [`BlockAccumulator`],
//! flushes it to a `tmp-{label}{block}` file pair and starts the next one.
//! Once the input is exhausted the block files of a pass are merged by the
//! [`IndexMerger`] into the published dictionary and index files.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::category::CategoryTree;
use crate::collation::Collation;
use crate::dictionary::{parse_dictionary_line, TermDictionary};
use crate::documents::{CategoryLoader, DocumentLoader, DocumentMeta, DocumentTable, TermOccurrence, TermType};
use crate::error::{Error, Result};
use crate::inverted::{InvertedIndex, PostingValue};
use crate::merger::IndexMerger;
use crate::ngram::{NGramIndex, BIGRAM, TRIGRAM};
use crate::positional::PositionalIndex;
use crate::{DocId, TermId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStrategy {
    #[default]
    InMemory,
    Blocked { doc_limit: usize, word_limit: usize },
}

impl BuildStrategy {
    pub fn validate(&self) -> Result<()> {
        match *self {
            BuildStrategy::Blocked { doc_limit, word_limit } if doc_limit == 0 || word_limit == 0 => {
                Err(Error::InvalidParameter("block limits must be positive".into()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Empty,
    Accumulating { block: usize },
    Flushed { block_count: usize },
    Merging,
    Done,
}

/// One construction pass; the label names its temp and published files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    Token,
    Phrase,
    Bigram,
    Trigram,
}

impl Pass {
    pub const ALL: [Pass; 4] = [Pass::Token, Pass::Phrase, Pass::Bigram, Pass::Trigram];

    pub fn label(self) -> &'static str {
        match self {
            Pass::Token => "token",
            Pass::Phrase => "phrase",
            Pass::Bigram => "bigram",
            Pass::Trigram => "trigram",
        }
    }

    pub fn n_gram_size(self) -> Option<usize> {
        match self {
            Pass::Bigram => Some(BIGRAM),
            Pass::Trigram => Some(TRIGRAM),
            _ => None,
        }
    }
}

/// A dictionary file and the index file that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFiles {
    pub dictionary: PathBuf,
    pub index: PathBuf,
}

impl BlockFiles {
    /// `tmp-{label}{block}-dictionary.txt` / `tmp-{label}{block}-index.txt`.
    pub fn temp(dir: &Path, pass: Pass, block: usize) -> Self {
        let stem = format!("tmp-{}{}", pass.label(), block);
        Self {
            dictionary: dir.join(format!("{stem}-dictionary.txt")),
            index: dir.join(format!("{stem}-index.txt")),
        }
    }

    /// The merged files a pass publishes.
    pub fn published(dir: &Path, pass: Pass) -> Self {
        Self {
            dictionary: dir.join(format!("{}-dictionary.txt", pass.label())),
            index: dir.join(format!("{}-index.txt", pass.label())),
        }
    }

    pub fn exists(&self) -> bool {
        self.dictionary.exists() && self.index.exists()
    }

    pub fn remove(&self) {
        fs::remove_file(&self.dictionary).ok();
        fs::remove_file(&self.index).ok();
    }
}

/// An index that can be flushed as a sorted block file and k-way merged.
pub trait BlockIndex: Default + Send {
    fn save_sorted(&mut self, path: &Path) -> Result<()>;

    /// Merges sorted block files into `output`; returns the number of terms written.
    fn merge_sorted(merger: &IndexMerger, inputs: &[PathBuf], output: &Path) -> Result<usize>;
}

impl<V: PostingValue> BlockIndex for InvertedIndex<V> {
    fn save_sorted(&mut self, path: &Path) -> Result<()> {
        InvertedIndex::save_sorted(self, path)
    }

    fn merge_sorted(merger: &IndexMerger, inputs: &[PathBuf], output: &Path) -> Result<usize> {
        merger.merge_postings::<V>(inputs, output)
    }
}

impl BlockIndex for PositionalIndex {
    fn save_sorted(&mut self, path: &Path) -> Result<()> {
        PositionalIndex::save_sorted(self, path)
    }

    fn merge_sorted(merger: &IndexMerger, inputs: &[PathBuf], output: &Path) -> Result<usize> {
        merger.merge_positional(inputs, output)
    }
}

/// The private dictionary and index of one block.
#[derive(Debug)]
pub struct BlockAccumulator<I> {
    pass: Pass,
    block: usize,
    dictionary: TermDictionary,
    index: I,
    documents: usize,
    words: usize,
}

impl<I: BlockIndex> BlockAccumulator<I> {
    pub fn new(pass: Pass, block: usize, collation: Collation) -> Self {
        Self {
            pass,
            block,
            dictionary: TermDictionary::new(collation),
            index: I::default(),
            documents: 0,
            words: 0,
        }
    }

    pub fn block(&self) -> usize {
        self.block
    }

    pub fn documents(&self) -> usize {
        self.documents
    }

    pub fn words(&self) -> usize {
        self.words
    }

    pub fn is_empty(&self) -> bool {
        self.documents == 0 && self.words == 0
    }

    pub fn dictionary(&self) -> &TermDictionary {
        &self.dictionary
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// Writes this block's file pair and hands back an empty accumulator for the next block.
    pub fn flush(mut self, dir: &Path) -> Result<(BlockFiles, Self)> {
        let files = BlockFiles::temp(dir, self.pass, self.block);
        self.dictionary.save(&files.dictionary)?;
        self.index.save_sorted(&files.index)?;
        debug!(
            pass = self.pass.label(),
            block = self.block,
            terms = self.dictionary.len(),
            documents = self.documents,
            words = self.words,
            "flushed block"
        );
        let next = Self::new(self.pass, self.block + 1, self.dictionary.collation());
        Ok((files, next))
    }

    pub fn into_parts(self) -> (TermDictionary, I) {
        (self.dictionary, self.index)
    }
}

impl BlockAccumulator<PositionalIndex> {
    pub fn add_document(&mut self, occurrences: &[TermOccurrence]) -> Result<()> {
        for occ in occurrences {
            self.dictionary.add_term(&occ.term.name, occ.term.term_id)?;
            self.index.add_position(occ.term.term_id, occ.doc_id, occ.position);
        }
        self.documents += 1;
        Ok(())
    }
}

impl BlockAccumulator<InvertedIndex<DocId>> {
    pub fn add_document(&mut self, occurrences: &[TermOccurrence]) -> Result<()> {
        for occ in occurrences {
            self.dictionary.add_term(&occ.term.name, occ.term.term_id)?;
            self.index.add(occ.term.term_id, occ.doc_id);
        }
        self.documents += 1;
        Ok(())
    }
}

impl BlockAccumulator<InvertedIndex<TermId>> {
    /// Registers the n-grams of one dictionary word.
    pub fn add_word(&mut self, word: &str, word_id: TermId, k: usize) -> Result<()> {
        self.dictionary
            .construct_n_grams(word, word_id, k, &mut self.index)?;
        self.words += 1;
        Ok(())
    }
}

/// Everything an in-memory build produces.
#[derive(Debug)]
pub struct BuiltIndexes {
    pub documents: DocumentTable,
    pub categories: CategoryTree,
    pub token_dictionary: TermDictionary,
    pub positional: PositionalIndex,
    pub phrase_dictionary: TermDictionary,
    pub phrase_index: InvertedIndex,
    pub bigrams: NGramIndex,
    pub trigrams: NGramIndex,
}

pub struct IndexBuilder {
    strategy: BuildStrategy,
    collation: Collation,
    parallel: bool,
    state: BuildState,
}

impl IndexBuilder {
    pub fn new(strategy: BuildStrategy, collation: Collation) -> Self {
        Self {
            strategy,
            collation,
            parallel: false,
            state: BuildState::Empty,
        }
    }

    /// Build the blocks of a document pass on the rayon pool. Merging stays sequential.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Single pass over all documents; nothing touches the disk.
    pub fn build_in_memory<L>(&mut self, loaders: &[L]) -> Result<BuiltIndexes>
    where
        L: DocumentLoader + CategoryLoader,
    {
        let ordered = ordered_loaders(loaders)?;
        let (documents, categories) = collect_documents(&ordered);

        self.state = BuildState::Accumulating { block: 0 };
        let mut tokens = BlockAccumulator::<PositionalIndex>::new(Pass::Token, 0, self.collation);
        let mut phrases = BlockAccumulator::<InvertedIndex>::new(Pass::Phrase, 0, self.collation);
        for loader in &ordered {
            tokens.add_document(&loader.load_document(TermType::Token)?)?;
            phrases.add_document(&loader.load_document(TermType::Phrase)?)?;
        }
        let (token_dictionary, positional) = tokens.into_parts();
        let (phrase_dictionary, mut phrase_index) = phrases.into_parts();
        phrase_index.finalize();

        let bigrams = NGramIndex::build(&token_dictionary, BIGRAM)?;
        let trigrams = NGramIndex::build(&token_dictionary, TRIGRAM)?;
        self.state = BuildState::Done;
        info!(
            documents = documents.len(),
            terms = token_dictionary.len(),
            phrases = phrase_dictionary.len(),
            "built indexes in memory"
        );
        Ok(BuiltIndexes {
            documents,
            categories,
            token_dictionary,
            positional,
            phrase_dictionary,
            phrase_index,
            bigrams,
            trigrams,
        })
    }

    /// Blocked build: every pass is flushed into temp block files under `dir`
    /// and merged into `{label}-dictionary.txt` / `{label}-index.txt` there.
    /// Returns the document and category tables; the caller persists them.
    ///
    /// A failed build leaves neither temp nor merged pass files in `dir`.
    pub fn build_on_disk<L>(&mut self, loaders: &[L], dir: &Path) -> Result<(DocumentTable, CategoryTree)>
    where
        L: DocumentLoader + CategoryLoader,
    {
        self.strategy.validate()?;
        let (doc_limit, word_limit) = match self.strategy {
            BuildStrategy::Blocked { doc_limit, word_limit } => (doc_limit, word_limit),
            BuildStrategy::InMemory => (usize::MAX, usize::MAX),
        };
        fs::create_dir_all(dir)?;
        let ordered = ordered_loaders(loaders)?;
        let (documents, categories) = collect_documents(&ordered);

        self.run_passes(&ordered, dir, doc_limit, word_limit).inspect_err(|err| {
            warn!(dir = %dir.display(), %err, "blocked build failed");
            for pass in Pass::ALL {
                remove_temp_files(dir, pass);
                BlockFiles::published(dir, pass).remove();
            }
        })?;

        self.state = BuildState::Done;
        info!(documents = documents.len(), dir = %dir.display(), "built indexes on disk");
        Ok((documents, categories))
    }

    fn run_passes<L>(&mut self, ordered: &[&L], dir: &Path, doc_limit: usize, word_limit: usize) -> Result<()>
    where
        L: DocumentLoader + CategoryLoader,
    {
        let merger = IndexMerger::new(self.collation);

        let token_blocks = self.guarded(dir, Pass::Token, |b| {
            b.document_pass::<PositionalIndex, L, _>(Pass::Token, ordered, dir, doc_limit, |acc, loader| {
                acc.add_document(&loader.load_document(TermType::Token)?)
            })
        })?;
        self.merge(&merger, dir, Pass::Token, &token_blocks)?;

        let phrase_blocks = self.guarded(dir, Pass::Phrase, |b| {
            b.document_pass::<InvertedIndex<DocId>, L, _>(Pass::Phrase, ordered, dir, doc_limit, |acc, loader| {
                acc.add_document(&loader.load_document(TermType::Phrase)?)
            })
        })?;
        self.merge(&merger, dir, Pass::Phrase, &phrase_blocks)?;

        for pass in [Pass::Bigram, Pass::Trigram] {
            let blocks = self.guarded(dir, pass, |b| b.n_gram_pass(pass, dir, word_limit))?;
            self.merge(&merger, dir, pass, &blocks)?;
        }
        Ok(())
    }

    /// Runs a block pass and removes its temp files if it fails.
    fn guarded<F>(&mut self, dir: &Path, pass: Pass, run: F) -> Result<Vec<BlockFiles>>
    where
        F: FnOnce(&mut Self) -> Result<Vec<BlockFiles>>,
    {
        run(self).inspect_err(|err| {
            warn!(pass = pass.label(), %err, "block pass failed");
            remove_temp_files(dir, pass);
        })
    }

    fn merge(&mut self, merger: &IndexMerger, dir: &Path, pass: Pass, blocks: &[BlockFiles]) -> Result<()> {
        self.state = BuildState::Merging;
        let published = BlockFiles::published(dir, pass);
        let merged = match pass {
            Pass::Token => merger.merge_pass::<PositionalIndex>(blocks, &published),
            Pass::Phrase => merger.merge_pass::<InvertedIndex<DocId>>(blocks, &published),
            Pass::Bigram | Pass::Trigram => merger.merge_pass::<InvertedIndex<TermId>>(blocks, &published),
        };
        if merged.is_err() {
            remove_temp_files(dir, pass);
        }
        merged
    }

    fn document_pass<I, L, F>(
        &mut self,
        pass: Pass,
        loaders: &[&L],
        dir: &Path,
        doc_limit: usize,
        add: F,
    ) -> Result<Vec<BlockFiles>>
    where
        I: BlockIndex,
        L: DocumentLoader,
        F: Fn(&mut BlockAccumulator<I>, &L) -> Result<()> + Sync,
    {
        let collation = self.collation;
        info!(pass = pass.label(), documents = loaders.len(), doc_limit, "starting block pass");
        if self.parallel && loaders.len() > doc_limit {
            let files = loaders
                .par_chunks(doc_limit)
                .enumerate()
                .map(|(block, chunk)| {
                    let mut acc = BlockAccumulator::<I>::new(pass, block, collation);
                    for loader in chunk {
                        add(&mut acc, *loader)?;
                    }
                    acc.flush(dir).map(|(files, _)| files)
                })
                .collect::<Result<Vec<_>>>()?;
            self.state = BuildState::Flushed { block_count: files.len() };
            return Ok(files);
        }

        let mut files = Vec::new();
        let mut acc = BlockAccumulator::<I>::new(pass, 0, collation);
        for loader in loaders {
            self.state = BuildState::Accumulating { block: acc.block() };
            add(&mut acc, *loader)?;
            if acc.documents() >= doc_limit {
                let (flushed, next) = acc.flush(dir)?;
                files.push(flushed);
                acc = next;
                self.state = BuildState::Flushed { block_count: files.len() };
            }
        }
        if !acc.is_empty() || files.is_empty() {
            let (flushed, _) = acc.flush(dir)?;
            files.push(flushed);
            self.state = BuildState::Flushed { block_count: files.len() };
        }
        Ok(files)
    }

    /// Streams the merged token dictionary and builds n-gram blocks of at most `word_limit` words.
    fn n_gram_pass(&mut self, pass: Pass, dir: &Path, word_limit: usize) -> Result<Vec<BlockFiles>> {
        let k = pass
            .n_gram_size()
            .ok_or_else(|| Error::InvalidParameter(format!("{} is not an n-gram pass", pass.label())))?;
        let source = BlockFiles::published(dir, Pass::Token).dictionary;
        let reader = BufReader::new(File::open(&source)?);
        info!(pass = pass.label(), word_limit, "starting block pass");

        let mut files = Vec::new();
        let mut acc = BlockAccumulator::<InvertedIndex<TermId>>::new(pass, 0, self.collation);
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let (word_id, word) = parse_dictionary_line(&line)
                .ok_or_else(|| Error::malformed(&source, i + 1, "expected \"{term_id} {name}\""))?;
            self.state = BuildState::Accumulating { block: acc.block() };
            acc.add_word(word, word_id, k)?;
            if acc.words() >= word_limit {
                let (flushed, next) = acc.flush(dir)?;
                files.push(flushed);
                acc = next;
                self.state = BuildState::Flushed { block_count: files.len() };
            }
        }
        if !acc.is_empty() || files.is_empty() {
            let (flushed, _) = acc.flush(dir)?;
            files.push(flushed);
            self.state = BuildState::Flushed { block_count: files.len() };
        }
        Ok(files)
    }
}

/// Loaders in ascending doc ID order; duplicate IDs are rejected.
fn ordered_loaders<L: DocumentLoader>(loaders: &[L]) -> Result<Vec<&L>> {
    let mut ordered: Vec<&L> = loaders.iter().collect();
    ordered.sort_by_key(|l| l.get_doc_id());
    if let Some(pair) = ordered.windows(2).find(|w| w[0].get_doc_id() == w[1].get_doc_id()) {
        return Err(Error::InvalidParameter(format!(
            "duplicate document id {}",
            pair[0].get_doc_id()
        )));
    }
    Ok(ordered)
}

/// Document table and category tree. Sizes are filled in once positions are known.
fn collect_documents<L: DocumentLoader + CategoryLoader>(loaders: &[&L]) -> (DocumentTable, CategoryTree) {
    let mut documents = DocumentTable::new();
    let mut categories = CategoryTree::new();
    for loader in loaders {
        let mut meta = DocumentMeta::new(loader.get_doc_id(), loader.get_name(), 0);
        meta.category = loader.load_category(&mut categories);
        documents.push(meta);
    }
    (documents, categories)
}

fn remove_temp_files(dir: &Path, pass: Pass) {
    let prefix = format!("tmp-{}", pass.label());
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(&prefix) {
            fs::remove_file(entry.path()).ok();
        }
    }
}
