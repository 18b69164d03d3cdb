//! Category hierarchy over documents.
//!
//! Nodes live in one arena owned by the tree; parent and child links are
//! arena indices. Index 0 is an unnamed root that every category descends from.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dictionary::TermDictionary;
use crate::error::Error;
use crate::positional::PositionalIndex;
use crate::tokenizer::normalize_phrase;
use crate::TermId;

pub type CategoryId = usize;

pub const ROOT: CategoryId = 0;

pub const DEFAULT_REPRESENTATIVE_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub name: String,
    pub parent: Option<CategoryId>,
    pub children: Vec<CategoryId>,
    /// Most frequent terms of the category's documents, best first.
    pub representatives: Vec<TermId>,
}

/// How query terms are mapped to categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeterminationMode {
    /// A query term names the category.
    #[default]
    ExactMatch,
    /// The category's representative terms overlap the query most.
    Representative,
}

impl FromStr for DeterminationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact-match" => Ok(DeterminationMode::ExactMatch),
            "representative" => Ok(DeterminationMode::Representative),
            _ => Err(Error::InvalidParameter(format!("unknown determination mode: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTree {
    nodes: Vec<CategoryNode>,
    representative_count: usize,
}

impl Default for CategoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![CategoryNode {
                name: String::new(),
                parent: None,
                children: Vec::new(),
                representatives: Vec::new(),
            }],
            representative_count: DEFAULT_REPRESENTATIVE_COUNT,
        }
    }

    pub fn root(&self) -> CategoryId {
        ROOT
    }

    /// Number of categories, root excluded.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self, id: CategoryId) -> Option<&CategoryNode> {
        self.nodes.get(id)
    }

    pub fn name(&self, id: CategoryId) -> &str {
        self.nodes.get(id).map(|n| n.name.as_str()).unwrap_or("")
    }

    pub fn parent(&self, id: CategoryId) -> Option<CategoryId> {
        self.nodes.get(id)?.parent
    }

    pub fn children(&self, id: CategoryId) -> &[CategoryId] {
        self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Returns the child of `parent` called `name`, creating it if missing.
    pub fn add_child(&mut self, parent: CategoryId, name: &str) -> CategoryId {
        if let Some(&existing) = self.nodes[parent]
            .children
            .iter()
            .find(|&&c| self.nodes[c].name == name)
        {
            return existing;
        }
        let id = self.nodes.len();
        self.nodes.push(CategoryNode {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            representatives: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Walks `path` from the root, creating missing nodes; returns the last one.
    pub fn insert_path<S: AsRef<str>>(&mut self, path: &[S]) -> CategoryId {
        path.iter()
            .fold(ROOT, |parent, name| self.add_child(parent, name.as_ref()))
    }

    /// First category (in creation order) called `name`.
    pub fn find(&self, name: &str) -> Option<CategoryId> {
        (1..self.nodes.len()).find(|&id| self.nodes[id].name == name)
    }

    /// True when `ancestor` lies strictly above `node`.
    pub fn is_descendant(&self, node: CategoryId, ancestor: CategoryId) -> bool {
        let mut current = self.parent(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// `node` is `category` or one of its descendants.
    pub fn is_within(&self, node: CategoryId, category: CategoryId) -> bool {
        node == category || self.is_descendant(node, category)
    }

    pub fn representative_count(&self) -> usize {
        self.representative_count
    }

    pub fn set_representative_count(&mut self, count: usize) {
        self.representative_count = count;
    }

    /// Picks each category's representative terms from the index's category
    /// counts. A category's counts include those of its descendants.
    pub fn set_representatives(&mut self, index: &PositionalIndex) {
        let mut totals: Vec<HashMap<TermId, u32>> = vec![HashMap::new(); self.nodes.len()];
        for id in 1..self.nodes.len() {
            let Some(counts) = index.category_counts(id) else {
                continue;
            };
            let mut current = Some(id);
            while let Some(c) = current.filter(|&c| c != ROOT) {
                for (term, count) in counts {
                    *totals[c].entry(*term).or_insert(0) += count;
                }
                current = self.parent(c);
            }
        }
        for (id, counts) in totals.into_iter().enumerate() {
            let mut ranked: Vec<(TermId, u32)> = counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            self.nodes[id].representatives = ranked
                .into_iter()
                .take(self.representative_count)
                .map(|(term, _)| term)
                .collect();
        }
    }

    /// Categories indicated by the query terms under `mode`.
    pub fn get_categories<S: AsRef<str>>(
        &self,
        terms: &[S],
        dictionary: &TermDictionary,
        mode: DeterminationMode,
    ) -> BTreeSet<CategoryId> {
        match mode {
            DeterminationMode::ExactMatch => {
                // query terms arrive tokenized, so names match raw or in indexed form
                let collation = dictionary.collation();
                let matches = |name: &str| {
                    terms
                        .iter()
                        .any(|t| collation.compare_primary(name, t.as_ref()) == Ordering::Equal)
                };
                (1..self.nodes.len())
                    .filter(|&id| {
                        let name = &self.nodes[id].name;
                        matches(name) || matches(&normalize_phrase(name))
                    })
                    .collect()
            }
            DeterminationMode::Representative => {
                let ids: Vec<TermId> = terms
                    .iter()
                    .filter_map(|t| dictionary.get_term_id(t.as_ref()))
                    .collect();
                let overlaps: Vec<(CategoryId, usize)> = (1..self.nodes.len())
                    .map(|id| {
                        let reps = &self.nodes[id].representatives;
                        (id, ids.iter().filter(|t| reps.contains(t)).count())
                    })
                    .collect();
                let best = overlaps.iter().map(|(_, n)| *n).max().unwrap_or(0);
                if best == 0 {
                    return BTreeSet::new();
                }
                overlaps
                    .into_iter()
                    .filter(|(_, n)| *n == best)
                    .map(|(id, _)| id)
                    .collect()
            }
        }
    }
}
