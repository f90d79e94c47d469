//! Shared fixture: a tiny two-cluster clinical indexer with separable
//! vocabulary, so the boosted classifiers converge in a few rounds.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use dac_coder::dac::DacModel;
use dac_coder::matcher::{Matcher, MatcherTrainConfig};
use dac_coder::ranker::{Ranker, RankerTrainConfig};

pub const INDEXER: &str = "clinical";

pub fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Lay out mappings, matcher/ranker/corpus splits under `root/indexers`
/// and return (indexers_path, models_path).
///
/// Clusters: `card` (labels c01, c02), `derm` (d01, d02) and `emp`, which
/// maps label e01 but has no training corpus at all.
pub fn build_fixture(root: &Path) -> (PathBuf, PathBuf) {
    let indexers = root.join("indexers");
    let models = root.join("models");
    let idx = indexers.join(INDEXER);

    write(
        &idx.join("mappings.json"),
        r#"{
            "c01": ["card"],
            "c02": ["card"],
            "d01": ["derm"],
            "d02": ["derm"],
            "e01": ["emp"]
        }"#,
    );

    write(
        &idx.join("matcher").join("matcher_train.txt"),
        "__label__card taquicardia ventricular sostenida\n\
         __label__card insuficiencia cardiaca congestiva\n\
         __label__card arritmia con palpitaciones nocturnas\n\
         __label__card dolor toracico y taquicardia\n\
         __label__derm dermatitis atopica en brote\n\
         __label__derm psoriasis con placas en codos\n\
         __label__derm eccema y dermatitis de contacto\n\
         __label__derm lesiones de psoriasis extensas\n",
    );
    write(
        &idx.join("matcher").join("matcher_dev.txt"),
        "__label__card episodio de taquicardia y palpitaciones\n\
         __label__derm brote de dermatitis en pliegues\n",
    );
    write(
        &idx.join("matcher").join("matcher_test.txt"),
        "__label__card taquicardia supraventricular paroxistica\n\
         __label__derm placas de psoriasis en rodillas\n",
    );

    write(
        &idx.join("ranker").join("ranker_card_train.txt"),
        "__label__c01 taquicardia ventricular sostenida\n\
         __label__c01 episodio de taquicardia paroxistica\n\
         __label__c01 taquicardia con palpitaciones\n\
         __label__c02 insuficiencia cardiaca congestiva\n\
         __label__c02 insuficiencia cardiaca descompensada\n\
         __label__c02 signos de insuficiencia cardiaca\n",
    );
    write(
        &idx.join("ranker").join("ranker_card_dev.txt"),
        "__label__c01 taquicardia nocturna\n\
         __label__c02 insuficiencia cardiaca cronica\n",
    );
    write(
        &idx.join("ranker").join("ranker_card_test.txt"),
        "__label__c01 taquicardia ventricular recurrente\n\
         __label__c02 insuficiencia cardiaca aguda\n",
    );
    write(
        &idx.join("ranker").join("ranker_derm_train.txt"),
        "__label__d01 dermatitis atopica en brote\n\
         __label__d01 dermatitis de contacto irritativa\n\
         __label__d01 eccema y dermatitis seca\n\
         __label__d02 psoriasis con placas extensas\n\
         __label__d02 psoriasis en codos y rodillas\n\
         __label__d02 placas de psoriasis pustulosa\n",
    );
    write(
        &idx.join("ranker").join("ranker_derm_dev.txt"),
        "__label__d01 dermatitis del lactante\n\
         __label__d02 psoriasis leve\n",
    );
    write(
        &idx.join("ranker").join("ranker_derm_test.txt"),
        "__label__d01 dermatitis alergica aguda\n\
         __label__d02 psoriasis palmar\n",
    );

    write(
        &idx.join("corpus").join("corpus_train.txt"),
        "__label__c01 taquicardia ventricular sostenida\n\
         __label__d02 psoriasis con placas en codos\n",
    );
    write(
        &idx.join("corpus").join("corpus_dev.txt"),
        "__label__c01 taquicardia ventricular recurrente\n\
         __label__d01 dermatitis atopica del lactante\n",
    );
    write(
        &idx.join("corpus").join("corpus_test.txt"),
        "__label__c01 taquicardia ventricular sintomatica\n\
         __label__c02 insuficiencia cardiaca global\n\
         __label__d01 dermatitis de contacto alergica\n\
         __label__d02 psoriasis pustulosa palmar\n",
    );

    (indexers, models)
}

/// Train both stages for one (transformer, seed) identity.
pub fn train_identity(indexers: &Path, models: &Path, transformer: &str, seed: u64) {
    let model_root = DacModel::model_root(models, INDEXER, transformer, seed);
    let mut matcher = Matcher::new(indexers, INDEXER, &model_root).unwrap();
    matcher
        .train(&MatcherTrainConfig { seed, ..Default::default() }, None)
        .unwrap();
    let mut ranker = Ranker::new(indexers, INDEXER, &model_root).unwrap();
    ranker.train(&RankerTrainConfig::default(), None).unwrap();
}
