//! Integration tests for lazy, event-driven invalidation

use cacheme::{
    CacheEntity, CacheMe, CacheMeConfig, CacheOptions, CallContext, ChangeKind, ChangeSource,
    EntityChange, MemoryStore, RelationSource, Store, TriggerKeys,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// In-memory "database" whose reads are counted.
#[derive(Default)]
struct Library {
    members: Mutex<HashMap<u64, Vec<u64>>>,
    reads: AtomicUsize,
}

impl Library {
    fn book_members(&self, book: u64) -> Vec<u64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.members.lock().get(&book).cloned().unwrap_or_default()
    }

    fn user_books(&self, user: u64) -> Vec<u64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut books: Vec<u64> = self
            .members
            .lock()
            .iter()
            .filter(|(_, users)| users.contains(&user))
            .map(|(book, _)| *book)
            .collect();
        books.sort_unstable();
        books
    }

    fn add_member(&self, book: u64, user: u64) {
        self.members.lock().entry(book).or_default().push(user);
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

struct User {
    id: u64,
}

impl CacheEntity for User {
    fn entity_name(&self) -> &str {
        "User"
    }

    fn cache_keys(&self) -> TriggerKeys {
        format!("User:{}", self.id).into()
    }
}

#[test]
fn test_change_is_visible_on_next_read() {
    let engine = CacheMe::default();
    let names = Arc::new(Mutex::new(HashMap::from([(1u64, "ada".to_string())])));
    let db = names.clone();

    let user_name = engine
        .register(
            "user_name",
            CacheOptions::new(|c| format!("User:{}:name", c.text("id")))
                .invalidation_keys(|c| format!("User:{}", c.text("id")))
                .sources([ChangeSource::entity("User")]),
            move |c: &CallContext| {
                let id: u64 = c.arg("id").unwrap_or_default();
                db.lock().get(&id).cloned().unwrap_or_default()
            },
        )
        .unwrap();

    let ctx = CallContext::new().with("id", &1);
    assert_eq!(user_name.call(ctx.clone()).unwrap(), "ada");

    names.lock().insert(1, "grace".to_string());
    // Not invalidated yet: the cached value is still served
    assert_eq!(user_name.call(ctx.clone()).unwrap(), "ada");

    let marked = engine
        .dispatch(&EntityChange::of(&User { id: 1 }, ChangeKind::Updated))
        .unwrap();
    assert_eq!(marked, 1);
    assert!(engine.index().is_pending("CMUser:1:name").unwrap());

    assert_eq!(user_name.call(ctx).unwrap(), "grace");
    assert!(!engine.index().is_pending("CMUser:1:name").unwrap());
}

#[test]
fn test_unsubscribed_changes_are_ignored() {
    let engine = CacheMe::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    let profile = engine
        .register(
            "profile",
            CacheOptions::new(|c| format!("Profile:{}", c.text("id")))
                .invalidation_keys(|c| format!("User:{}", c.text("id")))
                .sources([ChangeSource::entity("User")]),
            move |_: &CallContext| counter.fetch_add(1, Ordering::SeqCst),
        )
        .unwrap();

    let ctx = CallContext::new().with("id", &4);
    profile.call(ctx.clone()).unwrap();

    let change = EntityChange::new("Order", "User:4", ChangeKind::Created);
    assert_eq!(engine.dispatch(&change).unwrap(), 0);
    profile.call(ctx).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_many_to_many_change_invalidates_both_sides() {
    let engine = CacheMe::default();
    let library = Arc::new(Library::default());
    library.add_member(1, 10);

    let members_relation = RelationSource::new("book_members")
        .suffix("members")
        .related_keys(|user: &str| format!("User:{user}:books"));

    let by_book = library.clone();
    let book_members = engine
        .register(
            "book_members",
            CacheOptions::new(|c| format!("Book:{}>members", c.text("book")))
                .invalidation_keys(|c| format!("Book:{}:members", c.text("book")))
                .sources([ChangeSource::relation(members_relation.clone())]),
            move |c: &CallContext| by_book.book_members(c.arg("book").unwrap_or_default()),
        )
        .unwrap();

    let by_user = library.clone();
    let user_books = engine
        .register(
            "user_books",
            CacheOptions::new(|c| format!("User:{}>books", c.text("user")))
                .invalidation_keys(|c| format!("User:{}:books", c.text("user")))
                .sources([ChangeSource::relation(members_relation)]),
            move |c: &CallContext| by_user.user_books(c.arg("user").unwrap_or_default()),
        )
        .unwrap();

    let book = CallContext::new().with("book", &1);
    let user = CallContext::new().with("user", &20);
    assert_eq!(book_members.call(book.clone()).unwrap(), vec![10]);
    assert!(user_books.call(user.clone()).unwrap().is_empty());
    assert_eq!(library.reads(), 2);

    library.add_member(1, 20);
    let change = EntityChange::new("Book", "Book:1", ChangeKind::RelationAdded)
        .with_relation("book_members", [20]);
    assert_eq!(engine.dispatch(&change).unwrap(), 2);

    assert_eq!(book_members.call(book).unwrap(), vec![10, 20]);
    assert_eq!(user_books.call(user).unwrap(), vec![1]);
    assert_eq!(library.reads(), 4);
}

#[test]
fn test_trigger_keys_may_depend_on_result() {
    let engine = CacheMe::default();

    let author_books = engine
        .register(
            "author_books",
            CacheOptions::new(|c| format!("Author:{}:books", c.text("author")))
                .invalidation_keys(|c| {
                    c.result::<Vec<u64>>()
                        .unwrap_or_default()
                        .into_iter()
                        .map(|id| format!("Book:{id}"))
                        .collect::<TriggerKeys>()
                })
                .sources([ChangeSource::entity("Book")]),
            |_: &CallContext| vec![3u64, 5],
        )
        .unwrap();

    author_books
        .call(CallContext::new().with("author", &"tolkien"))
        .unwrap();

    let dependents = engine.index().dependents("Book:5").unwrap();
    assert!(dependents.contains("CMAuthor:tolkien:books"));

    let change = EntityChange::new("Book", "Book:3", ChangeKind::Deleted);
    assert_eq!(engine.dispatch(&change).unwrap(), 1);
    assert!(engine.index().is_pending("CMAuthor:tolkien:books").unwrap());
}

#[test]
fn test_tag_invalidation_is_isolated() {
    let engine = CacheMe::default();
    let left_runs = Arc::new(AtomicUsize::new(0));
    let right_runs = Arc::new(AtomicUsize::new(0));
    let (left_counter, right_counter) = (left_runs.clone(), right_runs.clone());

    let left = engine
        .register(
            "left",
            CacheOptions::new(|c| format!("Left:{}", c.text("n"))),
            move |_: &CallContext| left_counter.fetch_add(1, Ordering::SeqCst),
        )
        .unwrap();
    let right = engine
        .register(
            "right",
            CacheOptions::new(|c| format!("Right:{}", c.text("n"))),
            move |_: &CallContext| right_counter.fetch_add(1, Ordering::SeqCst),
        )
        .unwrap();

    for n in 0..3 {
        left.call(CallContext::new().with("n", &n)).unwrap();
        right.call(CallContext::new().with("n", &n)).unwrap();
    }

    assert_eq!(engine.invalidate_tag("left").unwrap(), 3);
    assert!(engine.registry().all_keys("left").unwrap().is_empty());
    assert_eq!(engine.registry().all_keys("right").unwrap().len(), 3);

    for n in 0..3 {
        left.call(CallContext::new().with("n", &n)).unwrap();
        right.call(CallContext::new().with("n", &n)).unwrap();
    }
    assert_eq!(left_runs.load(Ordering::SeqCst), 6);
    assert_eq!(right_runs.load(Ordering::SeqCst), 3);
}

#[test]
fn test_duplicate_tag_is_rejected() {
    let engine = CacheMe::default();
    engine
        .register(
            "first",
            CacheOptions::new(|_| "First".to_string()).tag("shared"),
            |_: &CallContext| 1u8,
        )
        .unwrap();

    let second = engine.register(
        "second",
        CacheOptions::new(|_| "Second".to_string()).tag("shared"),
        |_: &CallContext| 2u8,
    );
    assert!(matches!(second, Err(cacheme::CacheError::DuplicateTag(tag)) if tag == "shared"));
}

#[test]
fn test_engines_sharing_a_store_see_each_others_invalidations() {
    let store = Arc::new(MemoryStore::new());
    let writer = CacheMe::with_store(CacheMeConfig::default(), store.clone());
    let reader = CacheMe::with_store(CacheMeConfig::default(), store.clone());
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    let stock = reader
        .register(
            "stock",
            CacheOptions::new(|c| format!("Stock:{}", c.text("sku")))
                .invalidation_keys(|c| format!("Product:{}", c.text("sku"))),
            move |_: &CallContext| counter.fetch_add(1, Ordering::SeqCst),
        )
        .unwrap();

    let ctx = CallContext::new().with("sku", &"A1");
    stock.call(ctx.clone()).unwrap();

    // The writer never registered anything, yet its invalidation reaches the
    // reader through the shared store
    assert_eq!(writer.invalidate_key("Product:A1").unwrap(), 1);
    assert!(store.set_members("CM:delete").unwrap().contains("CMStock:A1"));

    stock.call(ctx).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_pattern_deletion_removes_only_matching_keys() {
    let store = Arc::new(MemoryStore::new());
    let engine = CacheMe::with_store(CacheMeConfig::default(), store.clone());

    for key in ["PATTERN:1", "PATTERN:2", "ANOTHER:3"] {
        store.hash_set(key, "base", b"1").unwrap();
    }

    assert_eq!(engine.invalidate_pattern("PATTERN*").unwrap(), 2);
    assert!(!store.contains_key("PATTERN:1"));
    assert!(!store.contains_key("PATTERN:2"));
    assert!(store.contains_key("ANOTHER:3"));
}

#[test]
fn test_pattern_deletion_across_many_pages() {
    let store = Arc::new(MemoryStore::new());
    let config = CacheMeConfig {
        scan_count: 3,
        delete_batch_size: 4,
        ..CacheMeConfig::default()
    };
    let engine = CacheMe::with_store(config, store.clone());

    let square = engine
        .register(
            "square",
            CacheOptions::new(|c| format!("Square:{}", c.text("n"))),
            |c: &CallContext| c.arg::<u64>("n").unwrap_or_default().pow(2),
        )
        .unwrap();
    for n in 0..25u64 {
        square.call(CallContext::new().with("n", &n)).unwrap();
    }

    assert_eq!(engine.invalidate_pattern("CMSquare:*").unwrap(), 25);
    assert!(store.keys().iter().all(|key| !key.starts_with("CMSquare:")));
}
