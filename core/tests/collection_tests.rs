use sift_core::{
    BuildStrategy, CategoryId, CategoryLoader, CategoryTree, Collation, Collection, CollectionConfig,
    DeterminationMode, DocId, DocumentLoader, DocumentWeighting, Error, FocusType, Query,
    SearchParameter, TermOccurrence, TermType, TermWeighting, TextDocument,
};
use tempfile::tempdir;

const TOPICS: [(&str, &str); 4] = [
    ("science/quantum", "quantum field spark atom light"),
    ("science/cell", "cell dna protein spark growth"),
    ("sport", "goal team match spark kick"),
    ("cooking", "oven flour bread dough light"),
];

fn corpus() -> Vec<TextDocument> {
    (0..26u32)
        .map(|i| {
            let (category, vocabulary) = TOPICS[i as usize % TOPICS.len()];
            let words: Vec<&str> = vocabulary.split(' ').collect();
            let text: Vec<&str> = (0..(3 + i as usize % 7))
                .map(|j| words[(i as usize + j * 2) % words.len()])
                .collect();
            TextDocument::new(i * 3 + 1, format!("doc-{i}"), text.join(" ")).with_category(category)
        })
        .collect()
}

fn queries() -> Vec<Query> {
    vec![
        Query::new(["spark"]),
        Query::new(["spark", "light"]),
        Query::new(["dna", "cell"]),
        Query::new(["quantum"]).with_phrase("field spark"),
        Query::new(["quantum", "spark"]),
        Query::new(["nothing"]),
        Query::default().with_attribute("title", "oven"),
    ]
}

fn parameters() -> Vec<SearchParameter> {
    vec![
        SearchParameter::boolean(),
        SearchParameter::positional(),
        SearchParameter::ranked(5),
        SearchParameter {
            term_weighting: TermWeighting::Natural,
            document_weighting: DocumentWeighting::ProbIdf,
            normalize: false,
            ..SearchParameter::ranked(50)
        },
        SearchParameter {
            focus_type: FocusType::Category,
            ..SearchParameter::boolean()
        },
        SearchParameter {
            focus_type: FocusType::Category,
            determination_mode: DeterminationMode::Representative,
            ..SearchParameter::ranked(5)
        },
    ]
}

fn assert_same_answers(a: &Collection, b: &Collection) {
    for query in queries() {
        for parameter in parameters() {
            assert_eq!(
                a.search_collection(&query, &parameter).unwrap(),
                b.search_collection(&query, &parameter).unwrap(),
                "{query:?} {parameter:?}"
            );
        }
    }
}

#[test]
fn blocked_build_matches_in_memory_build() {
    let docs = corpus();
    let in_memory = Collection::construct_indexes_in_memory(CollectionConfig::default(), &docs).unwrap();
    for parallel in [false, true] {
        let dir = tempdir().unwrap();
        let config = CollectionConfig {
            build_strategy: BuildStrategy::Blocked { doc_limit: 4, word_limit: 7 },
            parallel,
            ..CollectionConfig::default()
        };
        let blocked = Collection::construct_indexes_on_disk(config, &docs, dir.path()).unwrap();
        assert_eq!(blocked.token_dictionary(), in_memory.token_dictionary());
        assert_eq!(blocked.phrase_dictionary(), in_memory.phrase_dictionary());
        assert_eq!(blocked.positional(), in_memory.positional());
        assert_eq!(blocked.documents(), in_memory.documents());
        assert_eq!(blocked.categories(), in_memory.categories());
        assert_same_answers(&blocked, &in_memory);
        assert_eq!(blocked.suggest("sparc", 3), in_memory.suggest("sparc", 3));
    }
}

#[test]
fn saved_collection_loads_back() {
    let dir = tempdir().unwrap();
    let mut built = Collection::construct_indexes_in_memory(CollectionConfig::default(), &corpus()).unwrap();
    built.save(dir.path()).unwrap();
    let loaded = Collection::load(dir.path()).unwrap();
    assert_eq!(loaded.config(), built.config());
    assert_eq!(loaded.documents(), built.documents());
    assert_same_answers(&loaded, &built);
    assert_eq!(loaded.autocomplete("s", 5), built.autocomplete("s", 5));
}

#[test]
fn construct_dispatches_on_strategy() {
    let docs = corpus();
    let dir = tempdir().unwrap();
    let collection = Collection::construct(CollectionConfig::default(), &docs, dir.path()).unwrap();
    assert!(dir.path().join("meta.json").exists());
    assert!(dir.path().join("trigram-index.txt").exists());
    assert_eq!(collection.num_documents(), docs.len());
}

#[test]
fn ranked_results_prefer_short_documents() {
    let filler = |n: usize| (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
    let docs = vec![
        TextDocument::new(1, "five", format!("dog {}", filler(4))),
        TextDocument::new(2, "ten", format!("dog {}", filler(9))),
        TextDocument::new(3, "fifteen", format!("dog {}", filler(14))),
    ];
    let c = Collection::construct_indexes_in_memory(CollectionConfig::default(), &docs).unwrap();
    assert_eq!(c.documents().get(2).unwrap().size, 10);
    let parameter = SearchParameter {
        document_weighting: DocumentWeighting::No,
        ..SearchParameter::ranked(10)
    };
    let result = c.search_collection(&Query::new(["dog"]), &parameter).unwrap();
    assert_eq!(result.doc_ids(), vec![1, 2, 3]);
    let scores: Vec<f32> = result.iter().map(|d| d.score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn unknown_terms_weigh_nothing() {
    let c = Collection::construct_indexes_in_memory(CollectionConfig::default(), &corpus()).unwrap();
    let with = c
        .search_collection(&Query::new(["dna", "zzz"]), &SearchParameter::ranked(10))
        .unwrap();
    let without = c
        .search_collection(&Query::new(["dna"]), &SearchParameter::ranked(10))
        .unwrap();
    assert_eq!(with, without);
    assert!(c
        .search_collection(&Query::new(["dna", "zzz"]), &SearchParameter::boolean())
        .unwrap()
        .is_empty());
}

#[test]
fn case_insensitive_collation_survives_blocks() {
    let docs = corpus();
    let dir = tempdir().unwrap();
    let config = CollectionConfig {
        build_strategy: BuildStrategy::Blocked { doc_limit: 5, word_limit: 3 },
        collation: Collation::CaseInsensitive,
        ..CollectionConfig::default()
    };
    let c = Collection::construct_indexes_on_disk(config, &docs, dir.path()).unwrap();
    assert_eq!(c.token_dictionary().collation(), Collation::CaseInsensitive);
    assert!(!c
        .search_collection(&Query::new(["spark"]), &SearchParameter::boolean())
        .unwrap()
        .is_empty());
}

#[test]
fn corrupt_index_file_is_reported() {
    let dir = tempdir().unwrap();
    let mut c = Collection::construct_indexes_in_memory(CollectionConfig::default(), &corpus()).unwrap();
    c.save(dir.path()).unwrap();
    std::fs::write(dir.path().join("phrase-index.txt"), "12 x y\n").unwrap();
    match Collection::load(dir.path()) {
        Err(Error::MalformedIndexFile { line, .. }) => assert_eq!(line, 1),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn category_focus_narrows_to_subtree() {
    let c = Collection::construct_indexes_in_memory(CollectionConfig::default(), &corpus()).unwrap();
    let query = Query::new(["quantum"]);
    let plain = c.search_collection(&query, &SearchParameter::boolean()).unwrap();
    let focused = c
        .search_collection(
            &query,
            &SearchParameter {
                focus_type: FocusType::Category,
                ..SearchParameter::boolean()
            },
        )
        .unwrap();
    assert!(!focused.is_empty());
    assert_eq!(focused, plain, "only quantum documents mention quantum");

    let spark = c
        .search_collection(
            &Query::new(["spark", "cell"]),
            &SearchParameter {
                focus_type: FocusType::Category,
                ..SearchParameter::boolean()
            },
        )
        .unwrap();
    let cell = c.categories().find("cell").unwrap();
    for doc in spark.doc_ids() {
        assert_eq!(c.documents().get(doc).unwrap().category, Some(cell));
    }
}

/// Loads tokens normally but cannot produce phrases.
struct NoPhrases(TextDocument);

impl DocumentLoader for NoPhrases {
    fn get_doc_id(&self) -> DocId {
        self.0.get_doc_id()
    }

    fn load_document(&self, term_type: TermType) -> sift_core::Result<Vec<TermOccurrence>> {
        match term_type {
            TermType::Token => self.0.load_document(term_type),
            TermType::Phrase => Err(Error::InvalidParameter("phrase source offline".into())),
        }
    }
}

impl CategoryLoader for NoPhrases {
    fn load_category(&self, tree: &mut CategoryTree) -> Option<CategoryId> {
        self.0.load_category(tree)
    }
}

/// Every entry of `dir` with its bytes, sorted by path.
fn snapshot(dir: &std::path::Path) -> Vec<(std::path::PathBuf, Vec<u8>)> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .map(|p| {
            let bytes = std::fs::read(&p).unwrap_or_default();
            (p, bytes)
        })
        .collect();
    entries.sort();
    entries
}

#[test]
fn failed_rebuild_keeps_previous_collection() {
    let dir = tempdir().unwrap();
    let config = CollectionConfig {
        build_strategy: BuildStrategy::Blocked { doc_limit: 1, word_limit: 4 },
        ..CollectionConfig::default()
    };
    let first = vec![
        TextDocument::new(1, "a", "quick brown fox"),
        TextDocument::new(2, "b", "lazy dog"),
    ];
    Collection::construct(config.clone(), &first, dir.path()).unwrap();
    let before = snapshot(dir.path());

    let second: Vec<NoPhrases> = vec![
        NoPhrases(TextDocument::new(1, "a", "red whale")),
        NoPhrases(TextDocument::new(2, "b", "blue whale")),
    ];
    assert!(Collection::construct(config, &second, dir.path()).is_err());

    let after = snapshot(dir.path());
    assert_eq!(after, before);

    let c = Collection::load(dir.path()).unwrap();
    assert!(c.token_dictionary().get_term_id("whale").is_none());
    let fox = c
        .search_collection(&Query::new(["fox"]).with_phrase("quick brown"), &SearchParameter::boolean())
        .unwrap();
    assert_eq!(fox.doc_ids(), vec![1]);
}

#[test]
fn stale_staging_directory_is_cleared() {
    let dir = tempdir().unwrap();
    let mut c = Collection::construct_indexes_in_memory(CollectionConfig::default(), &corpus()).unwrap();
    c.save(dir.path()).unwrap();
    // left behind by an interrupted save
    std::fs::create_dir_all(dir.path().join(".staging").join("documents.bin")).ok();
    let mut other = Collection::construct_indexes_in_memory(
        CollectionConfig::default(),
        &[TextDocument::new(1, "x", "lonely word")],
    )
    .unwrap();
    other.save(dir.path()).unwrap();
    assert_eq!(Collection::load(dir.path()).unwrap().num_documents(), 1);
    assert!(!dir.path().join(".staging").exists());
}

#[test]
fn category_focus_with_tokenized_query() {
    let docs = vec![
        TextDocument::new(1, "fox", "brown fox").with_category("animals"),
        TextDocument::new(2, "bread", "brown bread").with_category("cooking"),
    ];
    let c = Collection::construct_indexes_in_memory(CollectionConfig::default(), &docs).unwrap();
    let query = Query::new(sift_core::tokenizer::query_terms("brown cooking"));
    assert_eq!(query.terms, vec!["brown", "cook"]);
    let parameter = SearchParameter {
        focus_type: FocusType::Category,
        ..SearchParameter::ranked(10)
    };
    assert_eq!(c.search_collection(&query, &parameter).unwrap().doc_ids(), vec![2]);
}
