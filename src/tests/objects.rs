use crate::collection::{Collection, CollectionFlags};
use crate::errors::Error;
use crate::item::{Item, ItemFlags};
use crate::service::{SearchFlags, ServiceFlags};
use crate::value::SecretValue;

use super::mock::{MockService, PromptScript};
use super::{attrs, eventually, login_path, open_service};

async fn login(service: &crate::Service) -> Collection {
    Collection::new_for_path(service, login_path(), CollectionFlags::empty(), None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_collection() {
    let mock = MockService::new();
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let collection = Collection::create(&service, "Work", None, None).await.unwrap();
    assert_eq!(collection.label().as_deref(), Some("Work"));
    assert_eq!(collection.locked(), Some(false));
    assert_eq!(collection.items().map(|items| items.len()), Some(0));
    assert_eq!(service.find_collection_instance(collection.path()), Some(collection.clone()));
    assert_eq!(mock.calls("Prompt"), 0);
}

#[tokio::test]
async fn test_create_collection_through_prompt() {
    let mock = MockService::new();
    mock.set_create_prompt(true);
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let collection = Collection::create(&service, "Work", Some("work"), None)
        .await
        .unwrap();
    assert_eq!(collection.path().as_str(), "/org/freedesktop/secrets/collection/work");
    assert_eq!(mock.calls("Prompt"), 1);
    let aliased = Collection::for_alias(&service, "work", CollectionFlags::empty(), None)
        .await
        .unwrap();
    assert_eq!(aliased, Some(collection));
}

#[tokio::test]
async fn test_dismissed_collection_creation() {
    let mock = MockService::new();
    mock.set_create_prompt(true);
    mock.set_prompt_script(PromptScript::Dismiss);
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let result = Collection::create(&service, "Work", None, None).await;
    assert!(matches!(result, Err(Error::Dismissed)));
    assert!(mock.collection_names().is_empty());
}

#[tokio::test]
async fn test_create_item() {
    let mock = MockService::with_login();
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let collection = login(&service).await;
    let attributes = attrs(&[("service", "mail"), ("user", "alice")]);
    let value = SecretValue::new(b"\x00binary\xff", "application/octet-stream");

    let item = Item::create(&collection, "Mail", &attributes, &value, false, None)
        .await
        .unwrap();
    assert_eq!(item.label().as_deref(), Some("Mail"));
    assert_eq!(item.attributes(), Some(attributes.clone()));
    assert_eq!(item.secret(), Some(value.clone()));
    assert_eq!(item.flags(), ItemFlags::LOAD_SECRET);
    assert_eq!(mock.stored_secret(item.path()).as_deref(), Some(value.get()));
    assert_eq!(item.created(), Some(1_700_000_000));

    // without replace a second item is created
    let second = Item::create(&collection, "Mail", &attributes, &value, false, None)
        .await
        .unwrap();
    assert_ne!(second, item);
    assert_eq!(mock.item_count("login"), 2);
}

#[tokio::test]
async fn test_create_item_in_locked_collection_fails() {
    let mock = MockService::with_login();
    mock.set_locked(&login_path(), true);
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let collection = login(&service).await;
    let result = Item::create(&collection, "x", &attrs(&[]), &SecretValue::from_text("pw"), false, None).await;
    assert!(result.unwrap_err().is_remote(crate::errors::IS_LOCKED));
}

#[tokio::test]
async fn test_update_item() {
    let mock = MockService::with_login();
    let path = mock.add_item("login", "mail", &[("service", "mail")], b"pw");
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let item = Item::new_for_path(&service, path.clone(), ItemFlags::empty(), None)
        .await
        .unwrap();
    assert_eq!(item.secret(), None);

    let attributes = attrs(&[("service", "imap")]);
    item.set_attributes(&attributes, None).await.unwrap();
    assert_eq!(item.attributes(), Some(attributes.clone()));
    let found = service.search_paths(&attributes, None).await.unwrap();
    assert_eq!(found.unlocked, vec![path]);

    item.set_label("imap", None).await.unwrap();
    assert_eq!(item.label().as_deref(), Some("imap"));
}

#[tokio::test]
async fn test_delete_item() {
    let mock = MockService::with_login();
    let path = mock.add_item("login", "mail", &[("service", "mail")], b"pw");
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let item = Item::new_for_path(&service, path.clone(), ItemFlags::empty(), None)
        .await
        .unwrap();

    assert!(item.delete(None).await.unwrap());
    assert_eq!(mock.item_count("login"), 0);
    assert_eq!(service.find_item_instance(&path), None);
}

#[tokio::test]
async fn test_dismissed_item_deletion() {
    let mock = MockService::with_login();
    let path = mock.add_item("login", "mail", &[("service", "mail")], b"pw");
    mock.set_delete_prompt(true);
    mock.set_prompt_script(PromptScript::Dismiss);
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let item = Item::new_for_path(&service, path.clone(), ItemFlags::empty(), None)
        .await
        .unwrap();

    assert!(!item.delete(None).await.unwrap());
    assert_eq!(mock.item_count("login"), 1);
    assert_eq!(service.find_item_instance(&path), Some(item));
}

#[tokio::test]
async fn test_delete_collection() {
    let mock = MockService::with_login();
    let work = mock.add_collection("work", "Work", false);
    mock.set_delete_prompt(true);
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let collection = Collection::new_for_path(&service, work.clone(), CollectionFlags::empty(), None)
        .await
        .unwrap();

    assert!(collection.delete(None).await.unwrap());
    assert_eq!(mock.collection_names(), vec!["login".to_string()]);
    assert_eq!(mock.calls("Prompt"), 1);
    assert_eq!(service.find_collection_instance(&work), None);
}

/// One unlocked and one locked item that both match `app=demo`.
fn two_matches(mock: &MockService) -> (crate::ObjectPath, crate::ObjectPath) {
    let open = mock.add_item("login", "open", &[("app", "demo")], b"open");
    let locked = mock.add_item("login", "locked", &[("app", "demo")], b"locked");
    mock.set_locked(&locked, true);
    (open, locked)
}

#[tokio::test]
async fn test_search_returns_one_unlocked_match_by_default() {
    let mock = MockService::with_login();
    let (open, _) = two_matches(&mock);
    let service = open_service(&mock, ServiceFlags::empty()).await;

    let found = service.search(&attrs(&[("app", "demo")]), SearchFlags::empty(), None).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].path(), &open);
    assert_eq!(found[0].secret(), None);
}

#[tokio::test]
async fn test_search_all_with_secrets() {
    let mock = MockService::with_login();
    let (open, locked) = two_matches(&mock);
    let service = open_service(&mock, ServiceFlags::empty()).await;

    let found = service
        .search(&attrs(&[("app", "demo")]), SearchFlags::ALL | SearchFlags::LOAD_SECRETS, None)
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
    let by_path = |path| found.iter().find(|item| item.path() == path).unwrap();
    assert_eq!(by_path(&open).secret().unwrap().text(), Some("open"));
    assert_eq!(by_path(&locked).secret(), None);
    assert_eq!(by_path(&locked).locked(), Some(true));
}

#[tokio::test]
async fn test_search_unlocks_locked_matches() {
    let mock = MockService::with_login();
    let (_, locked) = two_matches(&mock);
    let service = open_service(&mock, ServiceFlags::empty()).await;

    let found = service
        .search(
            &attrs(&[("app", "demo")]),
            SearchFlags::ALL | SearchFlags::UNLOCK | SearchFlags::LOAD_SECRETS,
            None,
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|item| item.locked() == Some(false)));
    assert!(found.iter().all(|item| item.secret().is_some()));
    assert_eq!(mock.is_locked(&locked), Some(false));
}

#[tokio::test]
async fn test_search_items_and_batched_secrets() {
    let mock = MockService::with_login();
    let (open, locked) = two_matches(&mock);
    let service = open_service(&mock, ServiceFlags::empty()).await;

    let found = service.search_items(&attrs(&[("app", "demo")]), None).await.unwrap();
    assert_eq!(found.unlocked.len(), 1);
    assert_eq!(found.locked.len(), 1);
    assert_eq!(found.locked[0].path(), &locked);

    let all: Vec<Item> = found.unlocked.iter().chain(&found.locked).cloned().collect();
    let secrets = service.get_secrets(&all, None).await.unwrap();
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[&found.unlocked[0]].text(), Some("open"));
    assert_eq!(found.unlocked[0].secret().unwrap().text(), Some("open"));
    assert_eq!(mock.calls("GetSecrets"), 1);

    let single = service.get_secret_for_path(&open, None).await.unwrap();
    assert_eq!(single.as_ref().and_then(SecretValue::text), Some("open"));
    assert_eq!(service.get_secret_for_path(&locked, None).await.unwrap(), None);
}

#[tokio::test]
async fn test_item_flags_load_secret() {
    let mock = MockService::with_login();
    let path = mock.add_item("login", "mail", &[("service", "mail")], b"pw");
    let service = open_service(&mock, ServiceFlags::empty()).await;

    let item = Item::new_for_path(&service, path.clone(), ItemFlags::empty(), None)
        .await
        .unwrap();
    assert_eq!(item.flags(), ItemFlags::empty());
    let again = Item::new_for_path(&service, path, ItemFlags::LOAD_SECRET, None)
        .await
        .unwrap();
    assert_eq!(again, item);
    assert_eq!(item.flags(), ItemFlags::LOAD_SECRET);
    assert_eq!(item.secret().unwrap().text(), Some("pw"));
    assert_eq!(mock.calls("GetSecret"), 1);
    assert!(service.flags().contains(ServiceFlags::OPEN_SESSION));
}

#[tokio::test]
async fn test_load_secrets_for_several_items() {
    let mock = MockService::with_login();
    let (open, _) = two_matches(&mock);
    let other = mock.add_item("login", "other", &[("app", "other")], b"other");
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let items = service.items_for_paths(&[open, other], None).await.unwrap();

    Item::load_secrets(&items, None).await.unwrap();
    assert_eq!(items[0].secret().unwrap().text(), Some("open"));
    assert_eq!(items[1].secret().unwrap().text(), Some("other"));
    Item::load_secrets(&[], None).await.unwrap();
}

#[tokio::test]
async fn test_collection_search() {
    let mock = MockService::with_login();
    two_matches(&mock);
    mock.add_item("login", "other", &[("app", "other")], b"other");
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let collection = login(&service).await;

    let first = collection
        .search(&attrs(&[("app", "demo")]), SearchFlags::empty(), None)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    let all = collection
        .search(&attrs(&[("app", "demo")]), SearchFlags::ALL | SearchFlags::UNLOCK, None)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|item| item.locked() == Some(false)));
    assert!(all.contains(&first[0]));
    assert_eq!(collection.cached_item(first[0].path()), Some(first[0].clone()));
}

#[tokio::test]
async fn test_collection_search_loads_matches_together() {
    let mock = MockService::with_login();
    let (open, locked) = two_matches(&mock);
    let service = open_service(&mock, ServiceFlags::empty()).await;
    let collection = login(&service).await;

    // the first match is held back; the second loads anyway
    mock.hold(&open);
    let query = attrs(&[("app", "demo")]);
    let (found, ()) = tokio::join!(
        collection.search(&query, SearchFlags::ALL, None),
        async {
            eventually(|| mock.get_all_calls(&locked) == 1).await;
            assert_eq!(mock.get_all_calls(&open), 0);
            mock.release(&open);
        }
    );
    let found = found.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].path(), &open);
    assert_eq!(found[1].path(), &locked);
}
