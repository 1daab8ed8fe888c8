use std::sync::Arc;
use std::time::Duration;
use ttl_table::prelude::*;
use ttl_table::test::init_tracing;

type Registry = Cache<String, u32>;

#[test]
fn same_name_same_table() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cache = Registry::new();
    assert!(cache.is_empty());

    let users = cache.table("users")?;
    users.add("alice".to_string(), Duration::ZERO, 1);

    let again = cache.table("users")?;
    assert!(Arc::ptr_eq(&users, &again));
    assert_eq!(again.count(), 1);
    assert_eq!(again.name(), "users");

    let orders = cache.table("orders")?;
    assert!(!Arc::ptr_eq(&users, &orders));
    assert_eq!(orders.count(), 0);

    Ok(())
}

#[test]
fn registry_lists_tables() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cache = Registry::default();

    assert!(!cache.has_table("a"));
    cache.table("a")?;
    cache.table("b")?;
    cache.table("a")?;

    assert!(cache.has_table("a"));
    assert!(cache.has_table("b"));
    assert!(!cache.has_table("c"));
    assert_eq!(cache.len(), 2);

    let mut names = cache.table_names();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);

    Ok(())
}

#[test]
fn concurrent_requests_share_one_table() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cache = Registry::new();

    let tables = std::thread::scope(|s| {
        let handles = (0..8)
            .map(|_| s.spawn(|| cache.table("shared")))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .collect::<Result<Vec<_>, _>>()
    })?;

    assert_eq!(cache.len(), 1);
    assert!(tables.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));

    Ok(())
}

#[test]
fn tables_of_registry_with_runtime_expire() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()?;
    let cache = Registry::with_runtime(runtime.handle().clone());

    let table = cache.table("timed")?;
    table.add("k".to_string(), Duration::from_millis(100), 1);
    assert!(!table.cleanup_interval().is_zero());

    std::thread::sleep(Duration::from_millis(400));
    assert!(!table.exists(&"k".to_string()));

    Ok(())
}
