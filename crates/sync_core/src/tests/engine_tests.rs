use std::time::Duration;

use super::*;
use crate::test_support::{ControlledStore, Gate, ScriptedChain, ScriptedWallet};
use chain_integration::WalletSession;
use shared::{domain::Generation, protocol::NoticeLevel};
use storage::MemoryKvStore;

fn addr(value: &str) -> Address {
    Address::from(value)
}

async fn engine() -> Arc<ContractSyncEngine> {
    ContractSyncEngine::open(Arc::new(MemoryKvStore::new()), EngineOptions::default()).await
}

async fn engine_over(store: &Arc<ControlledStore>) -> Arc<ContractSyncEngine> {
    ContractSyncEngine::open(store.clone(), EngineOptions::default()).await
}

fn drain_notices(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Notice(notice) = event {
            notices.push(notice);
        }
    }
    notices
}

/// Engine bound to 0xX for 0xA, with a selection of 0xY stuck in its store
/// write. Returns the pending selection and its gate.
async fn selection_of_y_in_flight(
    chain: &ScriptedChain,
) -> (
    Arc<ContractSyncEngine>,
    Arc<Gate>,
    tokio::task::JoinHandle<Result<Option<Arc<Binding>>, SyncError>>,
) {
    let owner = addr("0xA");
    chain.add_contract("0xX", "hello from X", &owner, 1);
    chain.add_contract("0xY", "hello from Y", &owner, 2);
    let store = Arc::new(ControlledStore::new());
    let engine = engine_over(&store).await;
    engine.select_address(addr("0xX")).await.expect("select");
    connect(&engine, chain, "0xA").await;
    assert_eq!(engine.current_binding().expect("bound").address(), &addr("0xX"));

    let gate = store.hold_next_write();
    let selecting = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.select_address(addr("0xY")).await }
    });
    gate.entered.notified().await;
    assert_eq!(engine.address_record().current, addr("0xY"));
    assert_eq!(engine.current_binding().expect("bound").address(), &addr("0xX"));
    (engine, gate, selecting)
}

async fn connect(
    engine: &Arc<ContractSyncEngine>,
    chain: &ScriptedChain,
    account: &str,
) -> Arc<ScriptedWallet> {
    let wallet = Arc::new(ScriptedWallet::new(WalletSession::new(
        chain.signer(&addr(account)),
    )));
    engine
        .connect_wallet(wallet.clone())
        .await
        .expect("connect");
    wallet
}

async fn next_binding_change(events: &mut broadcast::Receiver<EngineEvent>) -> Option<Generation> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let EngineEvent::BindingChanged { generation, .. } =
                events.recv().await.expect("event stream")
            {
                return generation;
            }
        }
    })
    .await
    .expect("binding change")
}

#[tokio::test]
async fn deploy_from_fresh_store_binds_and_grants_owner_controls() {
    let chain = ScriptedChain::new();
    chain.next_deploy_address("0xX");
    let engine = engine().await;
    connect(&engine, &chain, "0xA").await;
    assert!(engine.current_binding().is_none());
    assert_eq!(engine.address_record().selected(), None);

    let outcome = engine
        .submit(engine.deploy_request())
        .await
        .expect("deploy");

    assert!(matches!(outcome, SubmitOutcome::Deployed { ref address, .. } if *address == addr("0xX")));
    let binding = engine.current_binding().expect("bound");
    assert_eq!(binding.generation(), Generation(1));
    assert_eq!(binding.address(), &addr("0xX"));
    assert_eq!(engine.address_record().current, addr("0xX"));
    let mirror = engine.mirror();
    assert_eq!(mirror.owner, Some(addr("0xA")));
    assert_eq!(mirror.greeting.as_deref(), Some(DEFAULT_INITIAL_GREETING));
    assert_eq!(engine.view(), OwnerView::OwnerControls);
}

#[tokio::test]
async fn late_read_from_previous_address_never_reaches_the_mirror() {
    let chain = ScriptedChain::new();
    let owner = addr("0xA");
    chain.add_contract("0xX", "hello from X", &owner, 1);
    chain.add_contract("0xY", "hello from Y", &owner, 2);
    let engine = engine().await;
    engine.add_address(addr("0xY")).await.expect("add");
    engine.select_address(addr("0xX")).await.expect("select");
    connect(&engine, &chain, "0xA").await;
    assert_eq!(engine.mirror().greeting.as_deref(), Some("hello from X"));

    let gate = chain.hold_greet("0xX");
    let stale = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.refresh().await }
    });
    gate.entered.notified().await;

    let binding = engine
        .select_address(addr("0xY"))
        .await
        .expect("select")
        .expect("bound");
    assert_eq!(binding.generation(), Generation(2));
    assert_eq!(engine.mirror().greeting.as_deref(), Some("hello from Y"));

    gate.release.notify_one();
    let report = stale.await.expect("join").expect("refresh");
    assert_eq!(report.generation, Generation(1));
    assert!(report.is_stale());

    let mirror = engine.mirror();
    assert_eq!(mirror.generation, Some(Generation(2)));
    assert_eq!(mirror.greeting.as_deref(), Some("hello from Y"));
    assert_eq!(mirror.balance_wei.as_deref(), Some("2"));
}

#[tokio::test]
async fn wallet_disconnect_tears_the_binding_down() {
    let chain = ScriptedChain::new();
    chain.add_contract("0xX", "hi", &addr("0xA"), 0);
    let engine = engine().await;
    engine.select_address(addr("0xX")).await.expect("select");
    let wallet = connect(&engine, &chain, "0xA").await;
    assert!(engine.current_binding().is_some());
    let mut events = engine.subscribe_events();

    wallet.push(WalletNotification::Disconnected);

    assert_eq!(next_binding_change(&mut events).await, None);
    assert!(!engine.session().is_active);
    assert!(engine.mirror().is_empty());
    assert_eq!(engine.view(), OwnerView::ViewerInfo);
    assert_eq!(
        engine.refresh().await.expect_err("unbound"),
        SyncError::ContractUnbound
    );
}

#[tokio::test]
async fn account_switch_rebinds_and_drops_owner_controls() {
    let chain = ScriptedChain::new();
    chain.add_contract("0xX", "hi", &addr("0xA"), 0);
    let engine = engine().await;
    engine.select_address(addr("0xX")).await.expect("select");
    let wallet = connect(&engine, &chain, "0xA").await;
    assert_eq!(engine.view(), OwnerView::OwnerControls);
    let mut events = engine.subscribe_events();

    wallet.push(WalletNotification::AccountChanged(WalletSession::new(
        chain.signer(&addr("0xB")),
    )));

    assert_eq!(next_binding_change(&mut events).await, Some(Generation(2)));
    let binding = engine.current_binding().expect("bound");
    assert_eq!(binding.signer().account(), addr("0xB"));
    assert_eq!(engine.view(), OwnerView::ViewerInfo);
}

#[tokio::test]
async fn selecting_the_placeholder_unbinds() {
    let chain = ScriptedChain::new();
    chain.add_contract("0xX", "hi", &addr("0xA"), 0);
    let engine = engine().await;
    engine.select_address(addr("0xX")).await.expect("select");
    connect(&engine, &chain, "0xA").await;

    let binding = engine
        .select_address(Address::placeholder())
        .await
        .expect("select");

    assert!(binding.is_none());
    assert!(engine.current_binding().is_none());
}

#[tokio::test]
async fn local_validation_failure_is_announced_as_a_notice() {
    let chain = ScriptedChain::new();
    let engine = engine().await;
    let mut events = engine.subscribe_events();

    let err = engine
        .submit(SubmitRequest::SetGreeting { text: "hi".into() })
        .await
        .expect_err("no wallet");

    assert_eq!(err, SyncError::WalletUnavailable);
    assert_eq!(chain.network_calls(), 0);
    match events.try_recv().expect("notice") {
        EngineEvent::Notice(notice) => assert_eq!(notice.message, "Wallet not connected"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn sign_message_needs_a_session() {
    let chain = ScriptedChain::new();
    let engine = engine().await;
    assert_eq!(
        engine.sign_message("👋").await.expect_err("no session"),
        SyncError::WalletUnavailable
    );

    connect(&engine, &chain, "0xA").await;
    assert_eq!(
        engine.sign_message("👋").await.expect("signed"),
        "signed:0xA:👋"
    );
}

#[tokio::test]
async fn selection_survives_a_restart() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    let engine = ContractSyncEngine::open(Arc::clone(&store), EngineOptions::default()).await;
    engine.add_address(addr("0xX")).await.expect("add");
    engine.select_address(addr("0xY")).await.expect("select");
    drop(engine);

    let reopened = ContractSyncEngine::open(store, EngineOptions::default()).await;
    let record = reopened.address_record();
    assert_eq!(record.current, addr("0xY"));
    assert!(record.contains(&addr("0xX")));
    assert!(!record.contains(&addr("0xY")));
}

#[tokio::test]
async fn write_during_a_pending_selection_targets_the_new_address() {
    let chain = ScriptedChain::new();
    let (engine, gate, selecting) = selection_of_y_in_flight(&chain).await;

    engine
        .submit(SubmitRequest::SetGreeting {
            text: "meant for Y".into(),
        })
        .await
        .expect("greeting set");

    assert_eq!(
        chain.contract(&addr("0xY")).map(|c| c.greeting).as_deref(),
        Some("meant for Y")
    );
    assert_eq!(
        chain.contract(&addr("0xX")).map(|c| c.greeting).as_deref(),
        Some("hello from X")
    );
    let binding = engine.current_binding().expect("bound");
    assert_eq!(binding.address(), &addr("0xY"));
    assert_eq!(engine.mirror().greeting.as_deref(), Some("meant for Y"));

    gate.release.notify_one();
    let selected = selecting.await.expect("join").expect("persisted");
    assert_eq!(selected.map(|b| b.generation()), Some(binding.generation()));
}

#[tokio::test]
async fn refresh_during_a_pending_selection_reads_the_new_address() {
    let chain = ScriptedChain::new();
    let (engine, gate, selecting) = selection_of_y_in_flight(&chain).await;

    engine.refresh().await.expect("refreshed");

    assert_eq!(engine.current_binding().expect("bound").address(), &addr("0xY"));
    let mirror = engine.mirror();
    assert_eq!(mirror.greeting.as_deref(), Some("hello from Y"));
    assert_eq!(mirror.balance_wei.as_deref(), Some("2"));

    gate.release.notify_one();
    selecting.await.expect("join").expect("persisted");
}

#[tokio::test]
async fn deploy_with_a_failing_store_announces_the_persistence_failure() {
    let chain = ScriptedChain::new();
    chain.next_deploy_address("0xD");
    let store = Arc::new(ControlledStore::new());
    let engine = engine_over(&store).await;
    connect(&engine, &chain, "0xA").await;
    store.fail_writes(true);
    let mut events = engine.subscribe_events();

    let outcome = engine
        .submit(engine.deploy_request())
        .await
        .expect("deployed on chain");

    assert!(matches!(
        outcome,
        SubmitOutcome::Deployed {
            persistence: Some(SyncError::PersistenceFailure(_)),
            ..
        }
    ));
    assert_eq!(engine.current_binding().expect("bound").address(), &addr("0xD"));
    assert!(engine.has_unsynced_addresses());

    let notices = drain_notices(&mut events);
    assert!(notices
        .iter()
        .any(|n| n.level == NoticeLevel::Success && n.message == "Greeter deployed to: 0xD"));
    assert!(notices
        .iter()
        .any(|n| n.level == NoticeLevel::Error && n.message.contains("disk full")));
}

#[tokio::test]
async fn selecting_a_blank_address_unbinds() {
    let chain = ScriptedChain::new();
    chain.add_contract("0xX", "hello", &addr("0xA"), 0);
    let engine = engine().await;
    engine.select_address(addr("0xX")).await.expect("select");
    connect(&engine, &chain, "0xA").await;
    assert!(engine.current_binding().is_some());

    let binding = engine.select_address(addr("")).await.expect("select");

    assert!(binding.is_none());
    assert!(engine.current_binding().is_none());
    assert_eq!(
        engine.refresh().await.expect_err("unbound"),
        SyncError::ContractUnbound
    );
}
