//! End-to-end tracking scenarios: framework re-render churn, grace periods,
//! modal overlays, and session persistence through the public API.

use std::cell::RefCell;
use std::rc::Rc;

use rastro::{
    BoundingBox, Clock, FakeClock, LiveDocument, LiveNode, NodeStatus, SelectOption, SessionStore,
    TrackerConfig, TrackerEvent, TrackerEventKind, TreeTracker,
};

fn tracker_at(start_ms: u64) -> (TreeTracker, Rc<FakeClock>) {
    let clock = Rc::new(FakeClock::at(start_ms));
    let tracker = TreeTracker::with_clock(TrackerConfig::default(), clock.clone());
    (tracker, clock)
}

fn event_log(tracker: &mut TreeTracker) -> Rc<RefCell<Vec<TrackerEvent>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    tracker.on_any(move |event| sink.borrow_mut().push(event.clone()));
    log
}

fn kinds(log: &Rc<RefCell<Vec<TrackerEvent>>>) -> Vec<TrackerEventKind> {
    log.borrow().iter().map(TrackerEvent::kind).collect()
}

fn nav_link(href: &str, text: &str) -> LiveNode {
    LiveNode::new("a").with_attr("href", href).with_text(text)
}

// ============================================================================
// Re-render churn
// ============================================================================

#[test]
fn full_navigation_rerender_preserves_every_identity() {
    let (mut tracker, _clock) = tracker_at(1_000);
    let doc = Rc::new(LiveDocument::new());
    let nav = LiveNode::new("nav");
    doc.append_child(&doc.root(), nav.clone());
    let links = [
        nav_link("/home", "Home"),
        nav_link("/pricing", "Pricing"),
        nav_link("/docs", "Docs"),
    ];
    for link in &links {
        doc.append_child(&nav, link.clone());
    }
    tracker.start(Rc::clone(&doc)).unwrap();
    let ids_before: Vec<String> = tracker
        .get_all_nodes()
        .iter()
        .filter(|n| n.tag == "a")
        .map(|n| n.id.clone())
        .collect();
    assert_eq!(ids_before.len(), 3);
    let log = event_log(&mut tracker);

    // the framework tears down and rebuilds the whole nav
    for link in &links {
        doc.remove(link);
    }
    doc.append_child(&nav, nav_link("/home", "Home"));
    doc.append_child(&nav, nav_link("/pricing", "Pricing"));
    doc.append_child(&nav, nav_link("/docs", "Docs"));
    tracker.pump().unwrap();

    let ids_after: Vec<String> = tracker
        .get_all_nodes()
        .iter()
        .filter(|n| n.tag == "a")
        .map(|n| n.id.clone())
        .collect();
    assert_eq!(ids_after, ids_before);
    let seen = kinds(&log);
    assert!(!seen.contains(&TrackerEventKind::NodeRemoved));
    assert!(!seen.contains(&TrackerEventKind::NodeAdded));
    assert_eq!(
        seen.iter()
            .filter(|k| **k == TrackerEventKind::NodeMatched)
            .count(),
        3
    );
}

#[test]
fn rerender_with_text_drift_still_matches() {
    let (mut tracker, _clock) = tracker_at(1_000);
    let doc = Rc::new(LiveDocument::new());
    let rect = BoundingBox::new(40.0, 600.0, 200.0, 48.0);
    let button = LiveNode::new("button")
        .with_text("Add to cart")
        .with_rect(rect);
    doc.append_child(&doc.root(), button.clone());
    tracker.start(Rc::clone(&doc)).unwrap();
    let id = tracker
        .get_all_nodes()
        .iter()
        .find(|n| n.tag == "button")
        .unwrap()
        .id
        .clone();
    let log = event_log(&mut tracker);

    doc.remove(&button);
    doc.append_child(
        &doc.root(),
        LiveNode::new("button")
            .with_text("Add to cart (2)")
            .with_rect(rect),
    );
    tracker.pump().unwrap();

    assert_eq!(tracker.node_status(&id), Some(NodeStatus::Active));
    let changes = log
        .borrow()
        .iter()
        .find_map(|e| match e {
            TrackerEvent::NodeMatched { node_id, changes, .. } if *node_id == id => {
                Some(changes.clone())
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(changes.label.as_deref(), Some("Add to cart (2)"));
}

#[test]
fn swapped_test_ids_never_cross_match() {
    let (mut tracker, clock) = tracker_at(1_000);
    let doc = Rc::new(LiveDocument::new());
    let save = LiveNode::new("button")
        .with_attr("data-testid", "save")
        .with_text("Save");
    let cancel = LiveNode::new("button")
        .with_attr("data-testid", "cancel")
        .with_text("Cancel");
    doc.append_child(&doc.root(), save.clone());
    doc.append_child(&doc.root(), cancel.clone());
    tracker.start(Rc::clone(&doc)).unwrap();
    let nodes = tracker.get_all_nodes();
    let save_id = &nodes.iter().find(|n| n.label == "Save").unwrap().id;
    let cancel_id = &nodes.iter().find(|n| n.label == "Cancel").unwrap().id;

    // rebuild in reverse document order; identifiers must win over position
    doc.remove(&save);
    doc.remove(&cancel);
    doc.append_child(
        &doc.root(),
        LiveNode::new("button")
            .with_attr("data-testid", "cancel")
            .with_text("Cancel"),
    );
    doc.append_child(
        &doc.root(),
        LiveNode::new("button")
            .with_attr("data-testid", "save")
            .with_text("Save"),
    );
    tracker.pump().unwrap();
    clock.advance(500);
    tracker.pump().unwrap();

    let save_node = tracker.get_element(save_id).unwrap();
    assert_eq!(save_node.attr("data-testid").as_deref(), Some("save"));
    let cancel_node = tracker.get_element(cancel_id).unwrap();
    assert_eq!(cancel_node.attr("data-testid").as_deref(), Some("cancel"));
}

// ============================================================================
// Grace periods
// ============================================================================

#[test]
fn staggered_removals_expire_independently() {
    let (mut tracker, clock) = tracker_at(1_000);
    let doc = Rc::new(LiveDocument::new());
    let first = LiveNode::new("button").with_text("First");
    let second = LiveNode::new("a").with_attr("href", "/x").with_text("Second");
    doc.append_child(&doc.root(), first.clone());
    doc.append_child(&doc.root(), second.clone());
    tracker.start(Rc::clone(&doc)).unwrap();
    let log = event_log(&mut tracker);

    doc.remove(&first);
    drop(first);
    tracker.pump().unwrap();

    clock.advance(60);
    doc.remove(&second);
    drop(second);
    tracker.pump().unwrap();
    assert!(kinds(&log).is_empty());

    // first deadline (t=1120) passes, second (t=1180) has not
    clock.advance(70);
    tracker.pump().unwrap();
    assert_eq!(kinds(&log), vec![TrackerEventKind::NodeRemoved]);

    clock.advance(70);
    tracker.pump().unwrap();
    assert_eq!(
        kinds(&log),
        vec![TrackerEventKind::NodeRemoved, TrackerEventKind::NodeRemoved]
    );
}

#[test]
fn late_replacement_within_grace_is_rebound() {
    let (mut tracker, clock) = tracker_at(1_000);
    let doc = Rc::new(LiveDocument::new());
    let field = LiveNode::new("input").with_attr("name", "search");
    doc.append_child(&doc.root(), field.clone());
    tracker.start(Rc::clone(&doc)).unwrap();
    let id = tracker
        .get_all_nodes()
        .iter()
        .find(|n| n.tag == "input")
        .unwrap()
        .id
        .clone();
    let log = event_log(&mut tracker);

    doc.remove(&field);
    drop(field);
    tracker.pump().unwrap();
    assert_eq!(tracker.node_status(&id), Some(NodeStatus::Searching));

    // replacement appears in a later batch, still inside the grace window
    clock.advance(50);
    doc.append_child(&doc.root(), LiveNode::new("input").with_attr("name", "search"));
    tracker.pump().unwrap();

    assert_eq!(tracker.node_status(&id), Some(NodeStatus::Active));
    clock.advance(500);
    tracker.pump().unwrap();
    assert!(!kinds(&log).contains(&TrackerEventKind::NodeRemoved));
}

// ============================================================================
// Modal overlays
// ============================================================================

#[test]
fn replacing_modal_switches_active_overlay() {
    let (mut tracker, clock) = tracker_at(1_000);
    let doc = Rc::new(LiveDocument::new());
    doc.append_child(&doc.root(), LiveNode::new("p").with_text("Content"));
    tracker.start(Rc::clone(&doc)).unwrap();
    let log = event_log(&mut tracker);

    let confirm = LiveNode::new("div")
        .with_attr("role", "dialog")
        .with_attr("aria-label", "Confirm")
        .with_child(LiveNode::new("button").with_text("OK"));
    doc.append_child(&doc.root(), confirm.clone());
    tracker.pump().unwrap();
    let first_modal = tracker.get_tree().unwrap().active_modal_id.unwrap();

    doc.remove(&confirm);
    drop(confirm);
    let error_dialog = LiveNode::new("div")
        .with_attr("role", "alertdialog")
        .with_attr("aria-label", "Error")
        .with_child(LiveNode::new("button").with_text("Dismiss"));
    doc.append_child(&doc.root(), error_dialog);
    tracker.pump().unwrap();
    clock.advance(500);
    tracker.pump().unwrap();

    let second_modal = tracker.get_tree().unwrap().active_modal_id.unwrap();
    assert_ne!(second_modal, first_modal);
    let seen = kinds(&log);
    assert!(seen.contains(&TrackerEventKind::ModalOpened));
    assert!(seen.contains(&TrackerEventKind::ModalClosed));
}

// ============================================================================
// Actions driving host mutations
// ============================================================================

#[test]
fn click_then_host_reaction_flows_back_as_update() {
    let (mut tracker, _clock) = tracker_at(1_000);
    let doc = Rc::new(LiveDocument::new());
    let button = LiveNode::new("button").with_text("Follow");
    doc.append_child(&doc.root(), button.clone());
    tracker.start(Rc::clone(&doc)).unwrap();
    let id = tracker
        .get_all_nodes()
        .iter()
        .find(|n| n.tag == "button")
        .unwrap()
        .id
        .clone();
    let log = event_log(&mut tracker);

    assert!(tracker.click_element(&id).success);
    assert!(doc
        .take_events()
        .contains(&(button.ptr_id(), "click".to_string())));

    // host handles the click by updating the label
    doc.set_text(&button, "Following");
    tracker.pump().unwrap();

    assert_eq!(tracker.get_node(&id).unwrap().label, "Following");
    assert!(kinds(&log).contains(&TrackerEventKind::NodeUpdated));
}

#[test]
fn form_fill_sequence() {
    let (mut tracker, _clock) = tracker_at(1_000);
    let doc = Rc::new(LiveDocument::new());
    let form = LiveNode::new("form").with_attr("aria-label", "Signup");
    doc.append_child(&doc.root(), form.clone());
    let email = LiveNode::new("input").with_attr("name", "email");
    let terms = LiveNode::new("input")
        .with_attr("type", "checkbox")
        .with_attr("name", "terms")
        .with_checked(false);
    let country = LiveNode::new("select")
        .with_attr("name", "country")
        .with_options(vec![
            SelectOption::new("us", "United States"),
            SelectOption::new("jp", "Japan"),
        ]);
    doc.append_child(&form, email.clone());
    doc.append_child(&form, terms.clone());
    doc.append_child(&form, country.clone());
    tracker.start(Rc::clone(&doc)).unwrap();

    let nodes = tracker.get_all_nodes();
    let email_id = nodes.iter().find(|n| n.label == "email").map_or_else(
        || {
            nodes
                .iter()
                .find(|n| n.tag == "input" && n.form.as_ref().is_some_and(|f| f.checked.is_none()))
                .unwrap()
                .id
                .clone()
        },
        |n| n.id.clone(),
    );
    let terms_id = nodes
        .iter()
        .find(|n| n.form.as_ref().is_some_and(|f| f.checked.is_some()))
        .unwrap()
        .id
        .clone();
    let country_id = nodes.iter().find(|n| n.tag == "select").unwrap().id.clone();

    assert!(tracker.set_input_value(&email_id, "dev@example.test").success);
    assert!(tracker.toggle_checkbox(&terms_id, Some(true)).success);
    assert!(tracker.set_select_value(&country_id, "jp").success);

    assert_eq!(email.value().as_deref(), Some("dev@example.test"));
    assert_eq!(terms.checked(), Some(true));
    assert_eq!(country.value().as_deref(), Some("jp"));

    // cross-kind misuse is reported, not panicked
    let outcome = tracker.toggle_checkbox(&email_id, None);
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Element is not a checkbox"));
}

// ============================================================================
// Session persistence
// ============================================================================

#[test]
fn session_roundtrip_preserves_ids_across_reload() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());

    let (mut first, clock) = tracker_at(1_000);
    let doc = Rc::new(LiveDocument::new());
    doc.append_child(
        &doc.root(),
        LiveNode::new("button")
            .with_attr("data-testid", "checkout")
            .with_text("Checkout"),
    );
    doc.append_child(
        &doc.root(),
        LiveNode::new("input").with_attr("name", "coupon"),
    );
    first.start(Rc::clone(&doc)).unwrap();
    let button_id = first
        .get_all_nodes()
        .iter()
        .find(|n| n.tag == "button")
        .unwrap()
        .id
        .clone();
    store
        .save("cart", &first.export_fingerprints(), clock.now_ms())
        .unwrap();
    first.stop();

    // page reload: equivalent content, brand-new nodes
    let reloaded = Rc::new(LiveDocument::new());
    reloaded.append_child(
        &reloaded.root(),
        LiveNode::new("button")
            .with_attr("data-testid", "checkout")
            .with_text("Checkout"),
    );
    reloaded.append_child(
        &reloaded.root(),
        LiveNode::new("input").with_attr("name", "coupon"),
    );
    let (mut second, _clock) = tracker_at(5_000);
    let persisted = store.load("cart").unwrap();
    second.start_with_session(reloaded, persisted).unwrap();

    let restored_id = second
        .get_all_nodes()
        .iter()
        .find(|n| n.tag == "button")
        .unwrap()
        .id
        .clone();
    assert_eq!(restored_id, button_id);
    assert!(second.get_element(&button_id).is_some());
}
