//! Result cache behavior: signatures, hit/miss accounting, and synchronous
//! write-driven invalidation.

mod common;

use std::time::Duration;

use common::{Author, Book, Tag, User};
use serde_json::json;
use tether_orm::{ModelCrud, ModelError};

fn seed(conn: &tether_orm::SqliteConnection) -> i64 {
    let mut author = Author::new("Ursula");
    author.insert(conn).unwrap();
    let id = author.id.unwrap();
    Book::new("Earthsea", id).insert(conn).unwrap();
    Book::new("The Dispossessed", id).insert(conn).unwrap();
    id
}

#[test]
fn identical_query_hits_after_first_miss() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    let query = conn.select::<Book>().filter("title", "Earthsea");
    let before = conn.queries_executed();

    let first = query.fetch_all(&conn).unwrap();
    let second = query.fetch_all(&conn).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);

    // The second execution never reached the store.
    assert_eq!(conn.queries_executed(), before + 1);
    let stats = conn.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
}

#[test]
fn writes_to_a_dependent_table_evict_synchronously() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    let query = conn.select::<Book>().filter("title", "Earthsea");
    query.fetch_all(&conn).unwrap();
    assert_eq!(conn.cached_queries(), 1);

    // Update a matching row; the entry must be gone before the call returns.
    conn.select::<Book>()
        .filter("title", "Earthsea")
        .bypass_cache()
        .update(&conn, &[("title", json!("A Wizard of Earthsea"))])
        .unwrap();
    assert_eq!(conn.cached_queries(), 0);

    // The next identical query is a miss and reflects the update.
    let rows = query.fetch_all(&conn).unwrap();
    assert!(rows.is_empty());
    let renamed = conn
        .select::<Book>()
        .filter("title", "A Wizard of Earthsea")
        .bypass_cache()
        .fetch_all(&conn)
        .unwrap();
    assert_eq!(renamed.len(), 1);
    assert_eq!(conn.cache_stats().misses, 2);
}

#[test]
fn writes_to_unrelated_tables_do_not_evict() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    let query = conn.select::<Book>().filter("title", "Earthsea");
    query.fetch_all(&conn).unwrap();

    let mut user = User::new("alice");
    user.insert(&conn).unwrap();

    query.fetch_all(&conn).unwrap();
    assert_eq!(conn.cache_stats().hits, 1);
}

#[test]
fn eager_queries_depend_on_every_joined_table() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    let query = conn.select::<Book>().select_related(&["author"]);
    query.fetch_all(&conn).unwrap();
    assert_eq!(conn.cached_queries(), 1);

    // A write to the joined table evicts the entry.
    let mut author = Author::new("Octavia");
    author.insert(&conn).unwrap();
    assert_eq!(conn.cached_queries(), 0);
}

#[test]
fn prefetch_queries_depend_on_prefetched_tables() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    conn.select::<Author>()
        .prefetch_related(&["books"])
        .fetch_all(&conn)
        .unwrap();
    assert!(conn.cached_queries() >= 1);

    // Inserting a book stales the prefetching query's root entry.
    let author_id: i64 = conn
        .select::<Author>()
        .bypass_cache()
        .fetch_one(&conn)
        .unwrap()
        .unwrap()
        .id
        .unwrap();
    Book::new("Lavinia", author_id).insert(&conn).unwrap();
    assert_eq!(conn.cached_queries(), 0);

    // Re-running reflects the new row.
    let authors = conn
        .select::<Author>()
        .prefetch_related(&["books"])
        .fetch_all(&conn)
        .unwrap();
    assert_eq!(authors[0].books.count(&conn).unwrap(), 3);
}

#[test]
fn cascading_deletes_evict_dependent_entries() {
    let conn = common::connection();
    let author_id = seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    let query = conn.select::<Book>();
    assert_eq!(query.fetch_all(&conn).unwrap().len(), 2);

    // Deleting the author cascades into books; the cached book list must go.
    Author::find_or_fail(&conn, &author_id)
        .unwrap()
        .delete(&conn)
        .unwrap();
    assert!(query.fetch_all(&conn).unwrap().is_empty());
}

#[test]
fn bypass_skips_lookup_and_store() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    let before = conn.queries_executed();
    let query = conn.select::<Book>().bypass_cache();
    query.fetch_all(&conn).unwrap();
    query.fetch_all(&conn).unwrap();

    assert_eq!(conn.queries_executed(), before + 2);
    assert_eq!(conn.cache_stats().total(), 0);
    assert_eq!(conn.cached_queries(), 0);
}

#[test]
fn per_query_ttl_overrides_the_default() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    let query = conn
        .select::<Book>()
        .cache_ttl(Duration::from_millis(0));
    query.fetch_all(&conn).unwrap();
    std::thread::sleep(Duration::from_millis(5));

    // The entry expired under its own TTL even though the default is long.
    query.fetch_all(&conn).unwrap();
    assert_eq!(conn.cache_stats().misses, 2);
    assert_eq!(conn.cache_stats().hits, 0);
}

#[test]
fn clear_discards_entries_but_keeps_counters() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    let query = conn.select::<Book>();
    query.fetch_all(&conn).unwrap();
    query.fetch_all(&conn).unwrap();
    assert_eq!(conn.cache_stats().hits, 1);

    conn.clear_query_cache();
    assert_eq!(conn.cached_queries(), 0);
    assert_eq!(conn.cache_stats().hits, 1);
    assert_eq!(conn.cache_stats().misses, 1);
}

#[test]
fn different_parameters_are_different_signatures() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    conn.select::<Book>()
        .filter("title", "Earthsea")
        .fetch_all(&conn)
        .unwrap();
    conn.select::<Book>()
        .filter("title", "The Dispossessed")
        .fetch_all(&conn)
        .unwrap();
    assert_eq!(conn.cache_stats().misses, 2);
    assert_eq!(conn.cached_queries(), 2);

    // Field subset participates in the signature too.
    conn.select::<Book>()
        .filter("title", "Earthsea")
        .only("title")
        .fetch_all(&conn)
        .unwrap();
    assert_eq!(conn.cache_stats().misses, 3);
}

#[test]
fn count_queries_share_the_cache() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    let query = conn.select::<Book>();
    assert_eq!(query.count(&conn).unwrap(), 2);
    assert_eq!(query.count(&conn).unwrap(), 2);
    assert_eq!(conn.cache_stats().hits, 1);

    let mut tag = Tag::new("unrelated");
    tag.insert(&conn).unwrap();
    assert_eq!(query.count(&conn).unwrap(), 2);
    assert_eq!(conn.cache_stats().hits, 2);
}

#[test]
fn junction_writes_evict_m2m_queries() {
    let conn = common::connection();
    seed(&conn);
    let mut tag = Tag::new("classic");
    tag.insert(&conn).unwrap();
    conn.enable_query_cache(Duration::from_secs(60));

    let query = conn.select::<Book>().prefetch_related(&["tags"]);
    let books = query.fetch_all(&conn).unwrap();
    assert!(books[0].tags.loaded().unwrap().is_empty());
    assert!(conn.cached_queries() >= 1);

    // Linking through the junction table stales the prefetching query.
    let mut book = conn
        .select::<Book>()
        .bypass_cache()
        .fetch_first(&conn)
        .unwrap()
        .unwrap();
    book.tags.add(&conn, &[&tag]).unwrap();
    assert_eq!(conn.cached_queries(), 0);

    let books = query.fetch_all(&conn).unwrap();
    assert_eq!(books[0].tags.loaded().unwrap().len(), 1);
}

#[test]
fn closing_the_connection_resets_counters() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));
    conn.select::<Book>().fetch_all(&conn).unwrap();
    assert_eq!(conn.cache_stats().misses, 1);

    conn.close().unwrap();
}

#[test]
fn registry_errors_do_not_reach_the_store() {
    let conn = common::connection();
    seed(&conn);
    conn.enable_query_cache(Duration::from_secs(60));

    let before = conn.queries_executed();
    let err = conn
        .select::<Author>()
        .select_related(&["books"])
        .fetch_all(&conn)
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidPath(_)));
    // Path validation failed at compile time; nothing executed or cached.
    assert_eq!(conn.queries_executed(), before);
    assert_eq!(conn.cache_stats().total(), 0);
}
