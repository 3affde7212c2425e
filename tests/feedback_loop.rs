//! Feedback and retraining against the sled backend.

use std::sync::Arc;

use chrono::Utc;
use server_scout::storage::SledGateway;
use server_scout::types::{
    ClassifierKind, Feedback, Label, NewPrediction, ServerObservation, ServerOs, Verdict,
};
use server_scout::{PersistenceGateway, ScoutConfig, ScoutContext};
use tempfile::TempDir;

fn observation(i: u8, name: &str) -> ServerObservation {
    ServerObservation {
        addr: format!("198.51.100.{}:27015", i).parse().unwrap(),
        name: name.to_string(),
        map: "gm_construct".to_string(),
        tags: String::new(),
        max_players: 24,
        password_protected: false,
        vac_secured: true,
        version: "1".to_string(),
        os: ServerOs::Linux,
        country: None,
        seen_at: Utc::now(),
    }
}

fn config(dir: &TempDir) -> ScoutConfig {
    let mut config = ScoutConfig::default();
    config.classifier.model_dir = dir.path().join("models");
    config.classifier.min_training_samples = 6;
    config.classifier.training_passes = 40;
    config.classifier.learning_rate = 0.5;
    config
}

/// Seed reviewed regional predictions: three French servers accepted as
/// regional, three others rejected as regional.
fn seed(gateway: &dyn PersistenceGateway) {
    let servers = [
        (1, "serveur francais darkrp", Verdict::Accept),
        (2, "communaute francaise ttt", Verdict::Accept),
        (3, "bienvenue serveur prophunt", Verdict::Accept),
        (4, "us east darkrp", Verdict::Reject),
        (5, "uk community ttt", Verdict::Reject),
        (6, "german prophunt", Verdict::Reject),
    ];
    for (i, name, verdict) in servers {
        let server_id = gateway.upsert_server(&observation(i, name)).unwrap();
        let id = gateway
            .upsert_prediction(&NewPrediction {
                server_id,
                label: Label::Regional(true),
                confidence: 0.45,
                reason: "seed".to_string(),
                needs_review: true,
                model_version: "rules+lm0".to_string(),
                predicted_at: Utc::now(),
            })
            .unwrap();
        assert!(gateway
            .submit_feedback(
                id,
                Feedback {
                    verdict,
                    reason: None,
                    submitted_at: Utc::now(),
                },
            )
            .unwrap());
    }
}

#[test]
fn test_feedback_survives_reopen_and_feeds_retraining() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("scout.db");

    {
        let gateway = SledGateway::open(&db_path, 4).unwrap();
        seed(&gateway);
        assert!(gateway.predictions_needing_review().unwrap().is_empty());
        gateway.flush().unwrap();
    }

    // A later verdict never replaces the first one, even across a reopen
    {
        let gateway = SledGateway::open(&db_path, 4).unwrap();
        let first = gateway.feedback_training_set(ClassifierKind::Regional).unwrap()[0].1.clone();
        assert_eq!(first.feedback.as_ref().unwrap().verdict, Verdict::Accept);
        let flipped = Feedback {
            verdict: Verdict::Reject,
            reason: Some("changed my mind".to_string()),
            submitted_at: Utc::now(),
        };
        assert!(!gateway.submit_feedback(first.id, flipped).unwrap());
        let stored = gateway.get_prediction(first.id).unwrap().unwrap().feedback.unwrap();
        assert_eq!(stored.verdict, Verdict::Accept);
        assert_eq!(stored.reason, None);
        gateway.flush().unwrap();
    }

    let gateway: Arc<dyn PersistenceGateway> = Arc::new(SledGateway::open(&db_path, 4).unwrap());
    let reviewed = gateway.feedback_training_set(ClassifierKind::Regional).unwrap();
    assert_eq!(reviewed.len(), 6);
    assert!(gateway
        .feedback_training_set(ClassifierKind::GameMode)
        .unwrap()
        .is_empty());

    let ctx = ScoutContext::with_gateway(config(&dir), Arc::clone(&gateway)).unwrap();
    let before = ctx.ensemble.classify("serveur francais", "", "gm_construct");
    let report = ctx.retrainer().retrain(ClassifierKind::Regional).unwrap();
    assert_eq!(report.samples, 6);
    assert_eq!(ctx.ensemble.model_version(ClassifierKind::Regional), "rules+lm1");
    let after = ctx.ensemble.classify("serveur francais", "", "gm_construct");
    assert!(after.regional.confidence > before.regional.confidence);

    // Game mode has no feedback, so it keeps the bootstrap model
    assert!(ctx.retrainer().retrain(ClassifierKind::GameMode).is_err());
    assert_eq!(ctx.ensemble.model_version(ClassifierKind::GameMode), "rules+lm0");

    // A fresh process picks the checkpoint back up
    let restarted = ScoutContext::with_gateway(config(&dir), gateway).unwrap();
    assert_eq!(restarted.ensemble.model_version(ClassifierKind::Regional), "rules+lm1");
}
