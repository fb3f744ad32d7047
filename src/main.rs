use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use anyhow::Context;
use serde_json::json;
use soundbus::{callback, init_logging, Bus, BusSettings, Message, Settings, SubscribeOptions};
use tokio::task::LocalSet;

/// Состояние, увиденное наблюдателем канала "sum".
#[derive(Debug, Clone, Copy)]
struct Observation {
    a: i64,
    b: i64,
    correct: bool,
}

fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    let logging = init_logging(&settings.logging).context("failed to initialise logging")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();
    let observed = local.block_on(&runtime, run_sum_scenario(settings.bus))?;

    for (step, seen) in observed.iter().enumerate() {
        println!(
            "delivery {}: a={} b={} correct={}",
            step + 1,
            seen.a,
            seen.b,
            seen.correct
        );
    }

    logging.shutdown();
    Ok(())
}

/// Две связанные записи `a = 1` и `b = -1` публикуются внутри
/// `hold`: наблюдатель никогда не видит промежуточное `a=1, b=0`.
async fn run_sum_scenario(settings: BusSettings) -> anyhow::Result<Vec<Observation>> {
    let (bus, ready) = Bus::from_settings(settings);
    let point = Rc::new(Cell::new((0i64, 0i64)));
    let observed = Rc::new(RefCell::new(Vec::new()));

    let (p, seen) = (point.clone(), observed.clone());
    bus.subscribe(
        "sum",
        callback(move |msg: &Message| {
            let (a, b) = p.get();
            tracing::info!(payload = %msg.payload(), a, b, "sum observer");
            seen.borrow_mut().push(Observation {
                a,
                b,
                correct: a + b == 0,
            });
        }),
        SubscribeOptions::new(),
    )?;

    {
        let _hold = bus.hold();
        point.set((1, 0));
        bus.publish("sum", Message::new(json!({"a": 1})))?;
        point.set((1, -1));
        bus.publish("sum", Message::new(json!({"a": 1, "b": -1})))?;
    }

    match ready {
        Some(queue) => {
            queue.run_ready();
        }
        None => bus.idle().await,
    }
    bus.shutdown();

    let result = observed.borrow().clone();
    Ok(result)
}
