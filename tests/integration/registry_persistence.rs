use habitual::registry::{FileSubjectRegistry, SubjectId, SubjectRegistry};
use habitual::retry::RetryPolicy;

#[tokio::test]
async fn subscriptions_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subjects.json");

    let registry = FileSubjectRegistry::open(&path, RetryPolicy::no_retry())
        .await
        .unwrap();
    assert!(registry.list_all().await.unwrap().is_empty());
    assert!(registry.register(&SubjectId::from("b")).await.unwrap());
    assert!(registry.register(&SubjectId::from("a")).await.unwrap());
    assert!(!registry.register(&SubjectId::from("a")).await.unwrap());
    assert!(registry.unregister(&SubjectId::from("b")).await.unwrap());
    assert!(!registry.unregister(&SubjectId::from("zzz")).await.unwrap());
    drop(registry);

    let reopened = FileSubjectRegistry::open(&path, RetryPolicy::no_retry())
        .await
        .unwrap();
    assert_eq!(reopened.list_all().await.unwrap(), [SubjectId::from("a")]);
    assert!(!dir.path().join("subjects.json.tmp").exists());
}

#[tokio::test]
async fn corrupt_registry_is_an_error_not_an_empty_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subjects.json");
    std::fs::write(&path, b"{ not json").unwrap();

    assert!(
        FileSubjectRegistry::open(&path, RetryPolicy::no_retry())
            .await
            .is_err()
    );
    assert_eq!(std::fs::read(&path).unwrap(), b"{ not json");
}
