// Convergence and isolation between tabs of one origin.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chatsync::broadcast::Broadcaster;
use chatsync::models::{Message, TabEvent};
use common::{confirmed_conversation, settle, TestOrigin};

#[tokio::test]
async fn test_hundred_message_events_all_arrive() {
    let origin = TestOrigin::new();
    origin.store.seed_thread("thr_shared", "Shared");
    let mut tab_b = origin.open_tab("tab-b").await;
    tab_b.engine.select_conversation("thr_shared").await.unwrap();
    tab_b.engine.run_until_idle().await;

    let mut sender = Broadcaster::new(Arc::new(origin.hub.connect("tab-a")));
    let mut sent = HashSet::new();
    for n in 0..100 {
        let message = Message::user("thr_shared", format!("event {}", n));
        sent.insert(message.id.clone());
        sender
            .broadcast(&TabEvent::MessageUpserted {
                message,
                replaces: None,
            })
            .await
            .unwrap();
    }
    tab_b.engine.run_until_idle().await;

    let seen: HashSet<String> = tab_b.window().into_iter().map(|m| m.id).collect();
    assert_eq!(seen, sent);
    assert_eq!(sender.stats().sent, 100);
}

#[tokio::test]
async fn test_sibling_converges_on_new_conversation() {
    let origin = TestOrigin::new();
    let mut tab_a = origin.open_tab("tab-a").await;
    let mut tab_b = origin.open_tab("tab-b").await;

    let thread_id = confirmed_conversation(&mut tab_a, "Together").await;
    settle(&mut [&mut tab_a, &mut tab_b]).await;

    let seen = tab_b.engine.state().thread(&thread_id).cloned().unwrap();
    assert_eq!(seen.title, "Together");
    assert_eq!(tab_b.engine.threads().len(), 1);

    tab_b.engine.select_conversation(&thread_id).await.unwrap();
    tab_a.provider.push_reply(&["Hi", " there"]);
    tab_a.engine.send_message(&thread_id, "Hello").await.unwrap();
    settle(&mut [&mut tab_a, &mut tab_b]).await;

    assert_eq!(tab_b.contents(), vec!["Hello", "Hi there"]);
    let ids = |tab: &common::TestTab| tab.window().into_iter().map(|m| m.id).collect::<Vec<_>>();
    assert_eq!(ids(&tab_a), ids(&tab_b));
}

#[tokio::test]
async fn test_sibling_sees_rename_and_edit() {
    let origin = TestOrigin::new();
    let mut tab_a = origin.open_tab("tab-a").await;
    let mut tab_b = origin.open_tab("tab-b").await;
    let thread_id = confirmed_conversation(&mut tab_a, "Before").await;
    tab_a.engine.send_message(&thread_id, "typo").await.unwrap();
    settle(&mut [&mut tab_a, &mut tab_b]).await;
    tab_b.engine.select_conversation(&thread_id).await.unwrap();
    settle(&mut [&mut tab_a, &mut tab_b]).await;

    let user_id = tab_a.window()[0].id.clone();
    tab_a.engine.rename_conversation(&thread_id, "After").await.unwrap();
    tab_a.engine.edit_message(&user_id, "fixed").await.unwrap();
    settle(&mut [&mut tab_a, &mut tab_b]).await;

    assert_eq!(tab_b.engine.state().thread(&thread_id).unwrap().title, "After");
    assert_eq!(tab_b.window()[0].content, "fixed");
}

#[tokio::test]
async fn test_other_origin_is_isolated() {
    let origin = TestOrigin::new();
    let elsewhere = origin.sharing_store();
    let mut tab_a = origin.open_tab("tab-a").await;
    let mut tab_x = elsewhere.open_tab("tab-x").await;

    confirmed_conversation(&mut tab_a, "Private").await;
    settle(&mut [&mut tab_a, &mut tab_x]).await;

    // nothing crosses the origin boundary; only the store knows
    assert!(tab_x.engine.threads().is_empty());
    assert_eq!(tab_x.engine.broadcast_stats().delivered, 0);
    assert!(tab_x.engine.state().peers.is_empty());

    tab_x.engine.refresh_threads().await.unwrap();
    assert_eq!(tab_x.engine.threads().len(), 1);
}

#[tokio::test]
async fn test_selection_never_shows_other_conversation() {
    let origin = TestOrigin::new();
    origin.store.seed_thread("thr_a", "A");
    origin.store.seed_thread("thr_b", "B");
    for n in 0..5 {
        origin.store.seed_message("thr_a", &format!("a{}", n));
        origin.store.seed_message("thr_b", &format!("b{}", n));
    }
    let mut tab = origin.open_tab("tab-a").await;
    let mut states = tab.engine.subscribe_state();

    tab.engine.select_conversation("thr_a").await.unwrap();
    tab.engine.run_until_idle().await;
    assert_eq!(tab.window().len(), 5);

    tab.engine.select_conversation("thr_b").await.unwrap();
    assert!(tab.window().iter().all(|m| m.thread_id == "thr_b"));
    tab.engine.run_until_idle().await;

    let window = tab.window();
    assert_eq!(window.len(), 5);
    assert!(window.iter().all(|m| m.thread_id == "thr_b"));
    let latest = states.borrow_and_update().clone();
    assert_eq!(latest.active_thread.as_deref(), Some("thr_b"));
    assert!(latest.messages.iter().all(|m| m.thread_id == "thr_b"));
}

#[tokio::test]
async fn test_presence_and_single_leader() {
    let origin = TestOrigin::new();
    let mut tab_a = origin.open_tab("tab-a").await;
    let mut tab_b = origin.open_tab("tab-b").await;
    let mut tab_c = origin.open_tab("tab-c").await;
    for tab in [&mut tab_a, &mut tab_b, &mut tab_c] {
        tab.engine.heartbeat().await;
    }
    settle(&mut [&mut tab_a, &mut tab_b, &mut tab_c]).await;

    let leaders = [&tab_a, &tab_b, &tab_c]
        .iter()
        .filter(|t| t.engine.is_leader())
        .count();
    assert_eq!(leaders, 1);
    assert_eq!(tab_a.engine.state().live_tab_count(), 3);

    tab_c.engine.shutdown().await;
    settle(&mut [&mut tab_a, &mut tab_b]).await;
    assert_eq!(tab_a.engine.state().live_tab_count(), 2);
}
