mod common;

use dac_coder::core::ChannelId;
use dac_coder::corpus::read_corpus;
use dac_coder::dac::DacModel;
use dac_coder::matcher::{Matcher, MatcherTrainConfig};
use dac_coder::metrics::Metric;
use dac_coder::ranker::{Ranker, RankerTrainConfig};

#[test]
fn test_train_predict_eval_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (indexers, models) = common::build_fixture(dir.path());
    common::train_identity(&indexers, &models, "boosted", 1);

    let dac = DacModel::load(
        &indexers,
        &models,
        common::INDEXER,
        "boosted",
        1,
        None,
        None,
        None,
    )
    .unwrap();
    let corpus = read_corpus(
        &indexers.join(common::INDEXER).join("corpus"),
        "corpus",
        false,
    )
    .unwrap();
    let mut docs = corpus.test;
    assert_eq!(docs.len(), 4);

    dac.predict(&mut docs, None, true).unwrap();
    for doc in &docs {
        let merged = doc.predictions(&ChannelId::PredictedProba);
        assert!(!merged.is_empty());
        for prediction in merged {
            assert!((0.0..=1.0).contains(&prediction.score));
            assert_ne!(prediction.label, "incorrect-matcher");
        }
    }

    let scores = dac
        .eval(&mut docs, &[Metric::Map, Metric::Summary], 0)
        .unwrap();
    // Vocabulary is fully separable, so the gold label should dominate.
    assert!(scores["map"] > 0.7, "map was {}", scores["map"]);
    assert!(scores.contains_key("f1"));
    assert!(scores.contains_key("precision"));
    assert!(scores.contains_key("recall"));
}

#[test]
fn test_artifact_layout_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (indexers, models) = common::build_fixture(dir.path());
    common::train_identity(&indexers, &models, "boosted", 7);

    let model_root = DacModel::model_root(&models, common::INDEXER, "boosted", 7);
    assert!(model_root.join("matcher").join("final-model.json").is_file());
    for cluster in ["card", "derm"] {
        for kind in ["label_binarizer", "classifier", "tfidf"] {
            let path = model_root.join("ranker").join(format!("{kind}_{cluster}.json"));
            assert!(path.is_file(), "missing {}", path.display());
        }
    }
    // The empty cluster keeps its binarizer but never gets a classifier.
    assert!(model_root.join("ranker").join("label_binarizer_emp.json").is_file());
    assert!(!model_root.join("ranker").join("classifier_emp.json").exists());
    assert!(!model_root.join("ranker").join("tfidf_emp.json").exists());
}

#[test]
fn test_load_from_blob_store_after_wiping_local_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let (indexers, models) = common::build_fixture(dir.path());
    let remote = tempfile::tempdir().unwrap();
    let store = dac_coder::storage::LocalBlobStore::new(remote.path());

    let model_root = DacModel::model_root(&models, common::INDEXER, "boosted", 5);
    let prefix = format!("{}/boosted-5", common::INDEXER);
    let mut matcher = Matcher::new(&indexers, common::INDEXER, &model_root)
        .unwrap()
        .with_blob_prefix(&prefix);
    matcher.train(&MatcherTrainConfig::default(), Some(&store)).unwrap();
    let mut ranker = Ranker::new(&indexers, common::INDEXER, &model_root)
        .unwrap()
        .with_blob_prefix(&prefix);
    ranker.train(&RankerTrainConfig::default(), Some(&store)).unwrap();

    std::fs::remove_dir_all(&model_root).unwrap();
    let dac = DacModel::load(
        &indexers,
        &models,
        common::INDEXER,
        "boosted",
        5,
        Some(&store),
        Some(&store),
        None,
    )
    .unwrap();

    let corpus = read_corpus(
        &indexers.join(common::INDEXER).join("corpus"),
        "corpus",
        false,
    )
    .unwrap();
    let mut docs = corpus.test;
    dac.predict(&mut docs, None, true).unwrap();
    assert!(docs
        .iter()
        .all(|d| !d.predictions(&ChannelId::PredictedProba).is_empty()));
}

#[test]
fn test_reloaded_ranker_predicts_identically() {
    let dir = tempfile::tempdir().unwrap();
    let (indexers, models) = common::build_fixture(dir.path());
    let model_root = DacModel::model_root(&models, common::INDEXER, "boosted", 3);

    let mut matcher = Matcher::new(&indexers, common::INDEXER, &model_root).unwrap();
    matcher.train(&MatcherTrainConfig::default(), None).unwrap();
    let mut ranker = Ranker::new(&indexers, common::INDEXER, &model_root).unwrap();
    ranker.train(&RankerTrainConfig::default(), None).unwrap();

    let corpus = read_corpus(
        &indexers.join(common::INDEXER).join("corpus"),
        "corpus",
        false,
    )
    .unwrap();
    let mut fresh_docs = corpus.test.clone();
    let mut reloaded_docs = corpus.test;

    ranker.predict(&mut fresh_docs, true).unwrap();
    let reloaded = Ranker::load(&indexers, common::INDEXER, &model_root, None).unwrap();
    reloaded.predict(&mut reloaded_docs, true).unwrap();

    for (fresh, again) in fresh_docs.iter().zip(&reloaded_docs) {
        assert_eq!(
            fresh.predictions(&ChannelId::RankerProba),
            again.predictions(&ChannelId::RankerProba)
        );
    }
}
