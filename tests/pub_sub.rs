use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use serde_json::json;
use soundbus::{
    callback, keep_existing, merge_into_existing, Bus, BusError, BusSettings, Callback, Message,
    ReadyQueue, SubscribeOptions, SubscriptionHandle, Survivor,
};

type Log = Rc<RefCell<Vec<String>>>;

fn manual_bus() -> (Bus, ReadyQueue) {
    Bus::manual(BusSettings::default())
}

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Callback, записывающий `<tag><n>` для каждого сообщения.
fn recorder(
    log: &Log,
    tag: &str,
) -> Callback {
    let (log, tag) = (log.clone(), tag.to_string());
    callback(move |m: &Message| {
        let n = m.get("n").and_then(|v| v.as_i64()).unwrap_or(-1);
        log.borrow_mut().push(format!("{tag}{n}"));
    })
}

fn msg(n: i64) -> Message {
    Message::new(json!({ "n": n }))
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

#[test]
fn test_per_channel_order_and_subscriber_order() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    bus.subscribe("c", recorder(&log, "A"), SubscribeOptions::new())
        .unwrap();
    bus.subscribe("c", recorder(&log, "B"), SubscribeOptions::new())
        .unwrap();

    for n in 1..=3 {
        assert_eq!(bus.publish("c", msg(n)).unwrap(), 2);
    }
    assert!(entries(&log).is_empty());

    ready.run_ready();
    assert_eq!(entries(&log), vec!["A1", "B1", "A2", "B2", "A3", "B3"]);
    assert!(bus.is_idle());
}

/// Тест проверяет, что канал с несколькими сообщениями не вытесняет
/// сообщения других каналов, опубликованные между ними.
#[test]
fn test_channels_are_interleaved_in_publish_order() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    bus.subscribe("x", recorder(&log, "x"), SubscribeOptions::new())
        .unwrap();
    bus.subscribe("y", recorder(&log, "y"), SubscribeOptions::new())
        .unwrap();

    bus.publish("x", msg(1)).unwrap();
    bus.publish("y", msg(1)).unwrap();
    bus.publish("x", msg(2)).unwrap();
    assert_eq!(bus.stats().queued_occurrences, 3);

    ready.run_ready();
    assert_eq!(entries(&log), vec!["x1", "y1", "x2"]);
}

#[test]
fn test_publish_from_callback_is_deferred() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    bus.subscribe("b", recorder(&log, "b"), SubscribeOptions::new())
        .unwrap();

    let weak = bus.downgrade();
    let inner_log = log.clone();
    let seen_during_publish = Rc::new(Cell::new(usize::MAX));
    let seen = seen_during_publish.clone();
    bus.subscribe(
        "a",
        callback(move |m: &Message| {
            let bus = weak.upgrade().unwrap();
            inner_log.borrow_mut().push("a".to_string());
            bus.publish("b", m.clone()).unwrap();
            seen.set(inner_log.borrow().len());
        }),
        SubscribeOptions::new(),
    )
    .unwrap();

    bus.publish("a", msg(5)).unwrap();
    ready.run_ready();

    assert_eq!(seen_during_publish.get(), 1);
    assert_eq!(entries(&log), vec!["a", "b5"]);
}

#[test]
fn test_self_publishing_chain_terminates_in_order() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    let weak = bus.downgrade();
    let sink = log.clone();
    bus.subscribe(
        "count",
        callback(move |m: &Message| {
            let n = m.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            sink.borrow_mut().push(format!("{n}"));
            if n < 3 {
                weak.upgrade().unwrap().publish("count", msg(n + 1)).unwrap();
            }
        }),
        SubscribeOptions::new(),
    )
    .unwrap();

    bus.publish("count", msg(1)).unwrap();
    ready.run_ready();
    assert_eq!(entries(&log), vec!["1", "2", "3"]);
    assert!(bus.is_idle());
}

/// Сценарий "sum": две связанные записи внутри hold не дают наблюдателю
/// увидеть промежуточное состояние `a=1, b=0`.
#[test]
fn test_sum_observer_never_sees_partial_update() {
    let (bus, ready) = manual_bus();
    let point = Rc::new(Cell::new((0i64, 0i64)));
    let observed = Rc::new(RefCell::new(Vec::new()));

    let (p, seen) = (point.clone(), observed.clone());
    bus.subscribe(
        "sum",
        callback(move |_: &Message| {
            let (a, b) = p.get();
            seen.borrow_mut().push((a, b, a + b == 0));
        }),
        SubscribeOptions::new(),
    )
    .unwrap();

    {
        let _hold = bus.hold();
        point.set((1, 0));
        bus.publish("sum", Message::new(json!({"a": 1}))).unwrap();
        point.set((1, -1));
        bus.publish("sum", Message::new(json!({"a": 1, "b": -1})))
            .unwrap();
        ready.run_ready();
        assert!(observed.borrow().is_empty());
    }

    let observed = observed.borrow();
    assert_eq!(observed.len(), 2);
    assert!(observed.iter().all(|&(a, b, correct)| a == 1 && b == -1 && correct));
}

#[test]
fn test_compaction_collapses_to_first_message() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    bus.subscribe("c", recorder(&log, "t"), SubscribeOptions::new())
        .unwrap();
    bus.register_compactor("tick", keep_existing());

    for n in 1..=5 {
        bus.publish("c", Message::typed("tick", json!({ "n": n })))
            .unwrap();
    }
    // У сообщений без тега и с тегом без компактора поглощать некому.
    bus.publish("c", msg(6)).unwrap();
    bus.publish("c", Message::typed("other", json!({"n": 7})))
        .unwrap();

    ready.run_ready();
    assert_eq!(entries(&log), vec!["t1", "t6", "t7"]);
    assert_eq!(bus.stats().compacted, 4);
}

/// Тест проверяет, что компактору предлагается и ожидающее сообщение без
/// тега: решение о слиянии принимает сам компактор.
#[test]
fn test_compactor_is_offered_untyped_pending_message() {
    let (bus, ready) = manual_bus();
    let payloads = Rc::new(RefCell::new(Vec::new()));
    let sink = payloads.clone();
    bus.subscribe(
        "c",
        callback(move |m: &Message| sink.borrow_mut().push(m.payload().clone())),
        SubscribeOptions::new(),
    )
    .unwrap();
    bus.publish("c", Message::new(json!({"state": 1}))).unwrap();

    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    bus.register_compactor(
        "T",
        Rc::new(move |_: &Message, existing: &mut Message| {
            counter.set(counter.get() + 1);
            if existing.kind().is_none() {
                Survivor::Candidate
            } else {
                Survivor::Existing
            }
        }),
    );
    bus.publish("c", Message::typed("T", json!({"n": 2})))
        .unwrap();
    assert_eq!(calls.get(), 1);

    // Второе типизированное сообщение сливается с первым.
    bus.publish("c", Message::typed("T", json!({"n": 3})))
        .unwrap();
    assert_eq!(calls.get(), 3);

    ready.run_ready();
    assert_eq!(*payloads.borrow(), vec![json!({"state": 1}), json!({"n": 2})]);
    assert_eq!(bus.stats().compacted, 1);
}

/// Тест проверяет, что компактор с `keep_existing` поглощает новое
/// сообщение первым же ожидающим, даже если у того нет тега.
#[test]
fn test_keep_existing_absorbs_into_untyped_pending() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    bus.subscribe("c", recorder(&log, "t"), SubscribeOptions::new())
        .unwrap();
    bus.publish("c", msg(0)).unwrap();
    bus.register_compactor("tick", keep_existing());
    for n in 1..=3 {
        bus.publish("c", Message::typed("tick", json!({ "n": n })))
            .unwrap();
    }

    ready.run_ready();
    assert_eq!(entries(&log), vec!["t0"]);
    assert_eq!(bus.stats().compacted, 3);
}

#[test]
fn test_merge_compactor_keeps_position_with_latest_fields() {
    let (bus, ready) = manual_bus();
    let payloads = Rc::new(RefCell::new(Vec::new()));
    let sink = payloads.clone();
    bus.subscribe(
        "state",
        callback(move |m: &Message| sink.borrow_mut().push(m.payload().clone())),
        SubscribeOptions::new(),
    )
    .unwrap();
    bus.register_compactor("patch", merge_into_existing());

    bus.publish("state", Message::typed("patch", json!({"a": 1})))
        .unwrap();
    bus.publish("state", Message::new(json!({"marker": true})))
        .unwrap();
    bus.publish("state", Message::typed("patch", json!({"b": 2, "a": 3})))
        .unwrap();

    ready.run_ready();
    assert_eq!(
        *payloads.borrow(),
        vec![json!({"a": 3, "b": 2}), json!({"marker": true})]
    );
}

/// Тест проверяет, что сообщение, доставка которого уже началась, не
/// поглощает новые сообщения того же типа.
#[test]
fn test_started_message_is_not_compacted() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    bus.register_compactor("tick", keep_existing());

    let weak = bus.downgrade();
    let sink = log.clone();
    bus.subscribe(
        "c",
        callback(move |m: &Message| {
            let n = m.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            sink.borrow_mut().push(format!("{n}"));
            if n == 1 {
                let bus = weak.upgrade().unwrap();
                bus.publish("c", Message::typed("tick", json!({"n": 2})))
                    .unwrap();
                bus.publish("c", Message::typed("tick", json!({"n": 3})))
                    .unwrap();
            }
        }),
        SubscribeOptions::new(),
    )
    .unwrap();

    bus.publish("c", Message::typed("tick", json!({"n": 1})))
        .unwrap();
    ready.run_ready();
    assert_eq!(entries(&log), vec!["1", "2"]);
}

#[test]
fn test_late_subscriber_misses_in_flight_message() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    let weak = bus.downgrade();
    let late = recorder(&log, "late");
    let added = Rc::new(Cell::new(false));
    let (sink, flag) = (log.clone(), added.clone());
    bus.subscribe(
        "c",
        callback(move |m: &Message| {
            let n = m.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            sink.borrow_mut().push(format!("early{n}"));
            if !flag.replace(true) {
                weak.upgrade()
                    .unwrap()
                    .subscribe("c", late.clone(), SubscribeOptions::new())
                    .unwrap();
            }
        }),
        SubscribeOptions::new(),
    )
    .unwrap();

    bus.publish("c", msg(1)).unwrap();
    bus.publish("c", msg(2)).unwrap();
    ready.run_ready();
    assert_eq!(entries(&log), vec!["early1", "early2", "late2"]);
}

#[test]
fn test_once_and_continuation() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    bus.subscribe_once("c", recorder(&log, "once")).unwrap();
    bus.subscribe(
        "c",
        recorder(&log, "while"),
        SubscribeOptions::new().continue_while(|m| m.get("n") != Some(&json!(2))),
    )
    .unwrap();

    for n in 1..=3 {
        bus.publish("c", msg(n)).unwrap();
    }
    ready.run_ready();
    assert_eq!(entries(&log), vec!["once1", "while1", "while2"]);
}

#[test]
fn test_filter_skips_without_unsubscribing() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    bus.subscribe(
        "c",
        recorder(&log, "even"),
        SubscribeOptions::new().filter(|m| {
            m.get("n")
                .and_then(|v| v.as_i64())
                .is_some_and(|n| n % 2 == 0)
        }),
    )
    .unwrap();

    for n in 1..=4 {
        bus.publish("c", msg(n)).unwrap();
    }
    ready.run_ready();
    assert_eq!(entries(&log), vec!["even2", "even4"]);
}

/// Отписка до того, как курсор дошёл до подписчика, подавляет вызов для
/// текущего сообщения.
#[test]
fn test_unsubscribe_before_cursor_suppresses_delivery() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    let weak = bus.downgrade();
    let victim: Rc<RefCell<Option<SubscriptionHandle>>> = Rc::new(RefCell::new(None));

    let (sink, target) = (log.clone(), victim.clone());
    bus.subscribe(
        "c",
        callback(move |_: &Message| {
            sink.borrow_mut().push("first".to_string());
            if let Some(handle) = target.borrow_mut().take() {
                assert!(weak.upgrade().unwrap().unsubscribe_handle(&handle));
            }
        }),
        SubscribeOptions::new(),
    )
    .unwrap();
    let handle = bus
        .subscribe("c", recorder(&log, "second"), SubscribeOptions::new())
        .unwrap();
    *victim.borrow_mut() = Some(handle);

    bus.publish("c", msg(1)).unwrap();
    bus.publish("c", msg(2)).unwrap();
    ready.run_ready();
    assert_eq!(entries(&log), vec!["first", "first"]);
}

#[test]
fn test_unsubscribe_by_callback_identity() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    let shared = recorder(&log, "shared");
    let other = recorder(&log, "other");
    bus.subscribe("c", shared.clone(), SubscribeOptions::new())
        .unwrap();
    bus.subscribe("c", shared.clone(), SubscribeOptions::new().once())
        .unwrap();
    bus.subscribe("c", other, SubscribeOptions::new()).unwrap();

    assert_eq!(bus.unsubscribe("c", &shared, None), 2);
    assert_eq!(bus.unsubscribe("c", &shared, None), 0);
    assert_eq!(bus.unsubscribe("missing", &shared, None), 0);
    assert_eq!(bus.subscriber_count("c"), 1);

    bus.publish("c", msg(1)).unwrap();
    ready.run_ready();
    assert_eq!(entries(&log), vec!["other1"]);
}

#[test]
fn test_unsubscribe_with_filter_only_removes_matching_entry() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    let cb = recorder(&log, "cb");
    let only_two = soundbus::predicate(|m| m.get("n") == Some(&json!(2)));
    bus.subscribe(
        "c",
        cb.clone(),
        SubscribeOptions::new().with_filter(only_two.clone()),
    )
    .unwrap();
    bus.subscribe("c", cb.clone(), SubscribeOptions::new())
        .unwrap();

    assert_eq!(bus.unsubscribe("c", &cb, Some(&only_two)), 1);
    bus.publish("c", msg(2)).unwrap();
    ready.run_ready();
    assert_eq!(entries(&log), vec!["cb2"]);
}

/// N публикаций в N каналов внутри block/release доставляются до возврата
/// из `release_callbacks`, а `after_all_events` срабатывает последним.
#[test]
fn test_batch_drain_then_after_all_events() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    for i in 0..5 {
        bus.subscribe(format!("ch{i}"), recorder(&log, &format!("ch{i}:")), SubscribeOptions::new())
            .unwrap();
    }

    bus.block_callbacks();
    for i in 0..5 {
        bus.publish(format!("ch{i}"), msg(i)).unwrap();
    }
    let sink = log.clone();
    bus.after_all_events(move || sink.borrow_mut().push("done".to_string()));
    assert!(entries(&log).is_empty());
    assert_eq!(bus.level(), 1);

    bus.release_callbacks();
    assert_eq!(
        entries(&log),
        vec!["ch0:0", "ch1:1", "ch2:2", "ch3:3", "ch4:4", "done"]
    );
    assert_eq!(ready.len(), 5);
    ready.run_ready();
    assert_eq!(entries(&log).len(), 6);
}

/// Сообщение, опубликованное из post-drain колбэка, доставляется до
/// следующего post-drain колбэка.
#[test]
fn test_publish_from_after_all_is_drained_before_next_one() {
    let (bus, _ready) = manual_bus();
    let log = new_log();
    bus.subscribe("c", recorder(&log, "c"), SubscribeOptions::new())
        .unwrap();

    let _hold = bus.hold();
    let (weak, sink) = (bus.downgrade(), log.clone());
    bus.after_all_events(move || {
        sink.borrow_mut().push("first".to_string());
        weak.upgrade().unwrap().publish("c", msg(9)).unwrap();
    });
    let sink = log.clone();
    bus.after_all_events(move || sink.borrow_mut().push("second".to_string()));
    drop(_hold);

    assert_eq!(entries(&log), vec!["first", "c9", "second"]);
}

#[test]
fn test_after_all_events_from_callback_runs_after_pending_messages() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    let weak = bus.downgrade();
    let sink = log.clone();
    bus.subscribe(
        "c",
        callback(move |m: &Message| {
            let n = m.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            sink.borrow_mut().push(format!("c{n}"));
            if n == 1 {
                let done = sink.clone();
                weak.upgrade()
                    .unwrap()
                    .after_all_events(move || done.borrow_mut().push("done".to_string()));
            }
        }),
        SubscribeOptions::new(),
    )
    .unwrap();

    bus.publish("c", msg(1)).unwrap();
    bus.publish("c", msg(2)).unwrap();
    ready.run_ready();
    assert_eq!(entries(&log), vec!["c1", "c2", "done"]);
}

#[test]
fn test_weak_subscription_dies_with_callback() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    let cb = recorder(&log, "weak");
    bus.subscribe_weak("c", &cb, SubscribeOptions::new())
        .unwrap();

    bus.publish("c", msg(1)).unwrap();
    ready.run_ready();
    drop(cb);
    bus.publish("c", msg(2)).unwrap();
    ready.run_ready();
    assert_eq!(entries(&log), vec!["weak1"]);

    let dead = {
        let cb = recorder(&log, "dead");
        Rc::downgrade(&cb)
    };
    assert!(matches!(
        bus.subscribe_downgraded("c", dead, SubscribeOptions::new()),
        Err(BusError::InvalidCallback { .. })
    ));
}

#[test]
fn test_panicking_callback_is_isolated() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    bus.subscribe(
        "c",
        callback(|_: &Message| panic!("subscriber exploded")),
        SubscribeOptions::new(),
    )
    .unwrap();
    bus.subscribe("c", recorder(&log, "ok"), SubscribeOptions::new())
        .unwrap();

    bus.publish("c", msg(1)).unwrap();
    bus.publish("c", msg(2)).unwrap();
    ready.run_ready();

    assert_eq!(entries(&log), vec!["ok1", "ok2"]);
    let stats = bus.stats();
    assert_eq!(stats.panics, 2);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.level, 0);
    assert!(bus.is_idle());
}

#[test]
fn test_panicking_after_all_does_not_stop_drain() {
    let (bus, _ready) = manual_bus();
    let log = new_log();
    let _hold = bus.hold();
    bus.after_all_events(|| panic!("after-all exploded"));
    let sink = log.clone();
    bus.after_all_events(move || sink.borrow_mut().push("still runs".to_string()));
    drop(_hold);

    assert_eq!(entries(&log), vec!["still runs"]);
    assert_eq!(bus.stats().panics, 1);
}

#[test]
fn test_hold_inside_callback_keeps_level_balanced() {
    let (bus, ready) = manual_bus();
    let levels = Rc::new(RefCell::new(Vec::new()));
    let (weak, sink) = (bus.downgrade(), levels.clone());
    bus.subscribe(
        "c",
        callback(move |_: &Message| {
            let bus = weak.upgrade().unwrap();
            sink.borrow_mut().push(bus.level());
            let _hold = bus.hold();
            sink.borrow_mut().push(bus.level());
        }),
        SubscribeOptions::new(),
    )
    .unwrap();

    bus.publish("c", msg(1)).unwrap();
    ready.run_ready();
    assert_eq!(*levels.borrow(), vec![1, 2]);
    assert_eq!(bus.level(), 0);
}

#[test]
fn test_channel_names_and_ids() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    bus.subscribe(7i64, recorder(&log, "id"), SubscribeOptions::new())
        .unwrap();
    assert!(bus.has_channel(7i64));
    assert!(!bus.has_channel("7"));
    assert!(!bus.has_channel(""));

    bus.publish(7i64, msg(1)).unwrap();
    ready.run_ready();
    assert_eq!(entries(&log), vec!["id1"]);

    assert!(matches!(
        bus.subscribe("", recorder(&log, "x"), SubscribeOptions::new()),
        Err(BusError::InvalidChannelName { .. })
    ));
    assert!(matches!(
        bus.add_channel(0i64),
        Err(BusError::InvalidChannelName { .. })
    ));
}

#[test]
fn test_delivered_message_carries_channel() {
    let (bus, ready) = manual_bus();
    let channels = Rc::new(RefCell::new(Vec::new()));
    let sink = channels.clone();
    bus.subscribe(
        "stamped",
        callback(move |m: &Message| sink.borrow_mut().push(m.channel().map(|c| c.to_string()))),
        SubscribeOptions::new(),
    )
    .unwrap();

    bus.publish("stamped", msg(1)).unwrap();
    ready.run_ready();
    assert_eq!(*channels.borrow(), vec![Some("stamped".to_string())]);
}

#[test]
fn test_shutdown_drains_then_releases_subscribers() {
    let (bus, ready) = manual_bus();
    let log = new_log();
    let guard = bus
        .subscribe_scoped("c", recorder(&log, "c"), SubscribeOptions::new())
        .unwrap();
    bus.publish("c", msg(1)).unwrap();

    bus.shutdown();
    assert_eq!(entries(&log), vec!["c1"]);
    // Единственная оставшаяся ссылка на журнал у теста.
    assert_eq!(Rc::strong_count(&log), 1);

    drop(guard);
    ready.run_ready();
    assert_eq!(bus.publish("c", msg(2)), Err(BusError::ShutDown));
    assert!(matches!(bus.add_channel("c"), Err(BusError::ShutDown)));
}
