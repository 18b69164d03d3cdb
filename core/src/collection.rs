//! A built collection: every index, the document table and the category tree.

use std::collections::{BTreeSet, HashMap};
use std::fs::create_dir_all;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::builder::{BuildStrategy, BuiltIndexes, IndexBuilder, Pass};
use crate::category::{CategoryId, CategoryTree, DEFAULT_REPRESENTATIVE_COUNT};
use crate::collation::Collation;
use crate::dictionary::TermDictionary;
use crate::documents::{CategoryLoader, DocumentLoader, DocumentTable};
use crate::error::Result;
use crate::incidence::IncidenceMatrix;
use crate::intersect::{merge_intersect, IntersectStrategy};
use crate::inverted::InvertedIndex;
use crate::ngram::{NGramIndex, BIGRAM, TRIGRAM};
use crate::persist::{self, CollectionPaths, MetaFile};
use crate::positional::PositionalIndex;
use crate::query::{Attribute, FocusType, IndexType, Query, QueryResult, RetrievalType, SearchParameter};
use crate::{DocId, TermId};

/// Minimum trigram Jaccard similarity for a spelling suggestion.
pub const MIN_SUGGESTION_SIMILARITY: f32 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub build_strategy: BuildStrategy,
    pub collation: Collation,
    pub representative_count: usize,
    /// Build the blocks of each document pass on the rayon pool.
    pub parallel: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            build_strategy: BuildStrategy::InMemory,
            collation: Collation::Binary,
            representative_count: DEFAULT_REPRESENTATIVE_COUNT,
            parallel: false,
        }
    }
}

#[derive(Debug)]
pub struct Collection {
    config: CollectionConfig,
    documents: DocumentTable,
    categories: CategoryTree,
    token_dictionary: TermDictionary,
    positional: PositionalIndex,
    token_index: InvertedIndex,
    /// Built on the first incidence-matrix query.
    incidence: OnceLock<IncidenceMatrix>,
    phrase_dictionary: TermDictionary,
    phrase_index: InvertedIndex,
    bigrams: NGramIndex,
    trigrams: NGramIndex,
    /// Token term ID → dictionary position.
    token_positions: HashMap<TermId, usize>,
}

impl Collection {
    /// Builds with `config.build_strategy` and leaves the collection saved in `dir`.
    pub fn construct<L>(config: CollectionConfig, loaders: &[L], dir: &Path) -> Result<Self>
    where
        L: DocumentLoader + CategoryLoader,
    {
        match config.build_strategy {
            BuildStrategy::InMemory => {
                let mut collection = Self::construct_indexes_in_memory(config, loaders)?;
                collection.save(dir)?;
                Ok(collection)
            }
            BuildStrategy::Blocked { .. } => Self::construct_indexes_on_disk(config, loaders, dir),
        }
    }

    pub fn construct_indexes_in_memory<L>(config: CollectionConfig, loaders: &[L]) -> Result<Self>
    where
        L: DocumentLoader + CategoryLoader,
    {
        let mut builder = IndexBuilder::new(BuildStrategy::InMemory, config.collation);
        let built = builder.build_in_memory(loaders)?;
        Ok(Self::from_built(config, built))
    }

    /// Blocked build into `dir`, then loads the merged files back.
    ///
    /// Everything is built in a staging directory and replaces the files in
    /// `dir` only once the whole collection is written; a failed build leaves
    /// `dir` as it was.
    pub fn construct_indexes_on_disk<L>(config: CollectionConfig, loaders: &[L], dir: &Path) -> Result<Self>
    where
        L: DocumentLoader + CategoryLoader,
    {
        let paths = CollectionPaths::new(dir);
        let staging = persist::begin_staging(&paths)?;
        let built = Self::build_staged(config, loaders, &staging)
            .and_then(|collection| persist::publish(&staging, &paths).map(|()| collection));
        if built.is_err() {
            persist::discard(&staging);
        }
        built
    }

    fn build_staged<L>(config: CollectionConfig, loaders: &[L], staging: &CollectionPaths) -> Result<Self>
    where
        L: DocumentLoader + CategoryLoader,
    {
        let mut builder =
            IndexBuilder::new(config.build_strategy, config.collation).with_parallel(config.parallel);
        let (documents, categories) = builder.build_on_disk(loaders, &staging.root)?;
        persist::save_categories(staging, &categories)?;
        persist::save_documents(staging, &documents)?;
        persist::save_meta(staging, &MetaFile::new(documents.len() as u32, config))?;
        let collection = Self::load(&staging.root)?;
        // sizes are only known once positions are loaded
        persist::save_documents(staging, &collection.documents)?;
        Ok(collection)
    }

    fn from_built(config: CollectionConfig, built: BuiltIndexes) -> Self {
        let mut collection = Self {
            config,
            documents: built.documents,
            categories: built.categories,
            token_dictionary: built.token_dictionary,
            positional: built.positional,
            token_index: InvertedIndex::new(),
            incidence: OnceLock::new(),
            phrase_dictionary: built.phrase_dictionary,
            phrase_index: built.phrase_index,
            bigrams: built.bigrams,
            trigrams: built.trigrams,
            token_positions: HashMap::new(),
        };
        collection.prepare();
        collection
    }

    /// Writes every file of the collection into `dir`, replacing an existing
    /// collection there only once all of them are written.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        create_dir_all(dir)?;
        let paths = CollectionPaths::new(dir);
        let staging = persist::begin_staging(&paths)?;
        let saved = self
            .write_files(&staging)
            .and_then(|()| persist::publish(&staging, &paths));
        if saved.is_err() {
            persist::discard(&staging);
        }
        saved?;
        info!(dir = %dir.display(), documents = self.documents.len(), "saved collection");
        Ok(())
    }

    fn write_files(&mut self, paths: &CollectionPaths) -> Result<()> {
        let token = paths.pass(Pass::Token);
        self.token_dictionary.save(&token.dictionary)?;
        self.positional.save_sorted(&token.index)?;
        let phrase = paths.pass(Pass::Phrase);
        self.phrase_dictionary.save(&phrase.dictionary)?;
        self.phrase_index.save_sorted(&phrase.index)?;
        let bigram = paths.pass(Pass::Bigram);
        self.bigrams.save(&bigram.dictionary, &bigram.index)?;
        let trigram = paths.pass(Pass::Trigram);
        self.trigrams.save(&trigram.dictionary, &trigram.index)?;
        persist::save_documents(paths, &self.documents)?;
        persist::save_categories(paths, &self.categories)?;
        persist::save_meta(paths, &MetaFile::new(self.documents.len() as u32, self.config.clone()))
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let paths = CollectionPaths::new(dir);
        let meta = persist::load_meta(&paths)?;
        let collation = meta.config.collation;
        let token = paths.pass(Pass::Token);
        let phrase = paths.pass(Pass::Phrase);
        let bigram = paths.pass(Pass::Bigram);
        let trigram = paths.pass(Pass::Trigram);
        let built = BuiltIndexes {
            documents: persist::load_documents(&paths)?,
            categories: persist::load_categories(&paths)?,
            token_dictionary: TermDictionary::load(&token.dictionary, collation)?,
            positional: PositionalIndex::load(&token.index)?,
            phrase_dictionary: TermDictionary::load(&phrase.dictionary, collation)?,
            phrase_index: InvertedIndex::load(&phrase.index)?,
            bigrams: NGramIndex::load(BIGRAM, collation, &bigram.dictionary, &bigram.index)?,
            trigrams: NGramIndex::load(TRIGRAM, collation, &trigram.dictionary, &trigram.index)?,
        };
        info!(dir = %dir.display(), version = meta.version, created_at = %meta.created_at, "loading collection");
        Ok(Self::from_built(meta.config, built))
    }

    /// Precomputes document sizes, category counts, representatives and the
    /// structures derived from the positional index.
    fn prepare(&mut self) {
        self.positional.set_document_sizes(&self.documents);
        let sizes: Vec<(DocId, u32)> = self
            .documents
            .iter()
            .map(|d| (d.doc_id, self.positional.document_size(d.doc_id).unwrap_or(0)))
            .collect();
        for (doc_id, size) in sizes {
            self.documents.set_size(doc_id, size);
        }
        self.positional.set_category_counts(&self.documents);
        self.categories
            .set_representative_count(self.config.representative_count);
        self.categories.set_representatives(&self.positional);
        self.token_index = InvertedIndex::from(&self.positional);
        self.incidence = OnceLock::new();
        self.token_positions = self.token_dictionary.positions_by_id();
        info!(
            documents = self.documents.len(),
            terms = self.token_dictionary.len(),
            phrases = self.phrase_dictionary.len(),
            categories = self.categories.len(),
            "collection ready"
        );
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn documents(&self) -> &DocumentTable {
        &self.documents
    }

    pub fn categories(&self) -> &CategoryTree {
        &self.categories
    }

    pub fn token_dictionary(&self) -> &TermDictionary {
        &self.token_dictionary
    }

    pub fn phrase_dictionary(&self) -> &TermDictionary {
        &self.phrase_dictionary
    }

    pub fn positional(&self) -> &PositionalIndex {
        &self.positional
    }

    pub fn num_documents(&self) -> usize {
        self.documents.len()
    }

    pub fn search_collection(&self, query: &Query, parameter: &SearchParameter) -> Result<QueryResult> {
        parameter.validate()?;
        let mut result = if query.attributes.iter().any(|a| parameter.accepts_attribute(&a.key)) {
            self.attribute_search(query, parameter)?
        } else {
            let (terms, phrases) = split_query(query, query.attributes.iter());
            self.search_terms(&terms, &phrases, parameter)?
        };
        if parameter.focus_type == FocusType::Category {
            self.focus_on_categories(&mut result, query, parameter);
        }
        debug!(
            terms = query.terms.len(),
            phrases = query.phrases.len(),
            attributes = query.attributes.len(),
            hits = result.len(),
            "searched collection"
        );
        Ok(result)
    }

    /// Answers the attributes accepted by the parameter's filter against the
    /// token and phrase indexes, then filters the rest of the query's result by them.
    pub fn attribute_search(&self, query: &Query, parameter: &SearchParameter) -> Result<QueryResult> {
        let (accepted, rest): (Vec<&Attribute>, Vec<&Attribute>) = query
            .attributes
            .iter()
            .partition(|a| parameter.accepts_attribute(&a.key));
        let (phrase_attributes, term_attributes): (Vec<&Attribute>, Vec<&Attribute>) =
            accepted.into_iter().partition(|a| a.is_phrase());

        let term_values: Vec<&str> = term_attributes.iter().map(|a| a.value.trim()).collect();
        let phrase_values: Vec<String> = phrase_attributes.iter().map(|a| collapse_spaces(&a.value)).collect();
        let by_terms = (!term_values.is_empty()).then(|| self.token_index.search(&term_values, &self.token_dictionary));
        let by_phrases =
            (!phrase_values.is_empty()).then(|| self.phrase_index.search(&phrase_values, &self.phrase_dictionary));
        let (terms, phrases) = split_query(query, rest.into_iter());
        let filter = match (by_terms, by_phrases) {
            (Some(t), Some(p)) => merge_intersect(&t, &p),
            (Some(t), None) => t,
            (None, Some(p)) => p,
            (None, None) => return self.search_terms(&terms, &phrases, parameter),
        };
        if terms.is_empty() && phrases.is_empty() {
            return Ok(filter);
        }
        let main = self.search_terms(&terms, &phrases, parameter)?;
        let strategy = IntersectStrategy::select(filter.len(), parameter.retrieval_type);
        debug!(?strategy, main = main.len(), filter = filter.len(), "intersecting attribute result");
        Ok(strategy.apply(&main, &filter))
    }

    fn incidence(&self) -> &IncidenceMatrix {
        self.incidence.get_or_init(|| {
            debug!(terms = self.token_index.len(), documents = self.documents.len(), "building incidence matrix");
            IncidenceMatrix::build(&self.token_index, &self.documents)
        })
    }

    fn search_terms(&self, terms: &[String], phrases: &[String], parameter: &SearchParameter) -> Result<QueryResult> {
        let by_phrases = (!phrases.is_empty()).then(|| self.phrase_index.search(phrases, &self.phrase_dictionary));
        if terms.is_empty() {
            return Ok(by_phrases.unwrap_or_default());
        }
        let main = match (parameter.index_type, parameter.retrieval_type) {
            (IndexType::IncidenceMatrix, _) => self.incidence().search(terms, &self.token_dictionary),
            (IndexType::InvertedIndex, RetrievalType::Boolean) => {
                self.token_index.search(terms, &self.token_dictionary)
            }
            (IndexType::InvertedIndex, RetrievalType::Positional) => {
                self.positional.positional_search(terms, &self.token_dictionary)
            }
            (IndexType::InvertedIndex, RetrievalType::Ranked) => self.positional.ranked_search(
                terms,
                &self.token_dictionary,
                &self.documents,
                parameter.term_weighting,
                parameter.document_weighting,
                parameter.normalize,
                parameter.result_count,
            )?,
        };
        Ok(match by_phrases {
            Some(filter) => IntersectStrategy::select(filter.len(), parameter.retrieval_type).apply(&main, &filter),
            None => main,
        })
    }

    /// Keeps documents filed under (or below) a category the query resolves to.
    /// A query resolving to no category keeps nothing.
    fn focus_on_categories(&self, result: &mut QueryResult, query: &Query, parameter: &SearchParameter) {
        let categories: BTreeSet<CategoryId> =
            self.categories
                .get_categories(&query.terms, &self.token_dictionary, parameter.determination_mode);
        debug!(?categories, "category focus");
        result.retain(|item| {
            self.documents
                .get(item.doc_id)
                .and_then(|d| d.category)
                .is_some_and(|c| categories.iter().any(|&focus| self.categories.is_within(c, focus)))
        });
    }

    /// Dictionary words starting with `prefix` that occur in some document,
    /// most frequent first. Candidates come from the bigram index and are
    /// checked against the token dictionary.
    pub fn autocomplete(&self, prefix: &str, limit: usize) -> Vec<(String, u32)> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Vec::new();
        }
        let candidates = self.prefix_candidates(prefix);
        debug!(prefix, candidates = candidates.len(), "autocomplete");
        let mut ranked = self.token_index.autocomplete_word(&candidates, &self.token_dictionary);
        ranked.truncate(limit);
        ranked
    }

    /// Dictionary positions of the bigram candidates that really start with `prefix`.
    fn prefix_candidates(&self, prefix: &str) -> Vec<usize> {
        let collation = self.token_dictionary.collation();
        let mut positions: Vec<usize> = self
            .bigrams
            .prefix_candidates(prefix)
            .into_iter()
            .filter_map(|id| self.token_positions.get(&id).copied())
            .filter(|&i| {
                self.token_dictionary
                    .get(i)
                    .is_some_and(|t| collation.starts_with(&t.name, prefix))
            })
            .collect();
        positions.sort_unstable();
        positions
    }

    /// Dictionary words spelled like `word`, by trigram overlap.
    pub fn suggest(&self, word: &str, limit: usize) -> Vec<(String, f32)> {
        self.trigrams
            .similar_words(word.trim(), MIN_SUGGESTION_SIMILARITY)
            .into_iter()
            .filter_map(|(id, score)| {
                let position = *self.token_positions.get(&id)?;
                let term = self.token_dictionary.get(position)?;
                Some((term.name.clone(), score))
            })
            .take(limit)
            .collect()
    }
}

/// Query terms and phrases plus the given attribute values, each value
/// going to the terms or the phrases by its word count.
fn split_query<'a>(query: &Query, attributes: impl Iterator<Item = &'a Attribute>) -> (Vec<String>, Vec<String>) {
    let mut terms = query.terms.clone();
    let mut phrases = query.phrases.clone();
    for attribute in attributes {
        if attribute.is_phrase() {
            phrases.push(collapse_spaces(&attribute.value));
        } else if !attribute.value.trim().is_empty() {
            terms.push(attribute.value.trim().to_string());
        }
    }
    (terms, phrases)
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
