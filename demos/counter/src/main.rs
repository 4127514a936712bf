//! Counter - Minimal epickit example
//!
//! This example demonstrates the core pattern:
//! - State: What the app knows
//! - Actions: What can happen, each carrying its transition
//! - Epic: Starts a ticker on `start_counting`, restarting it on every repeat
//! - Kernel: Where state lives
//!
//! Run with `RUST_LOG=epickit_core=debug` to watch the kernel work.
//! Pass a path to a JSON `KernelConfig` as the first argument to override
//! the defaults.

use std::time::Duration;

use epickit::prelude::*;
use tracing_subscriber::EnvFilter;

// ============================================================================
// State - What the app knows
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
struct Counter {
    counter: u32,
}

// ============================================================================
// Actions - What can happen
// ============================================================================

#[derive(ActionKind, Clone, Copy, Debug, PartialEq, Eq)]
enum CounterAction {
    StartCounting,
    Increment,
}

fn increment() -> ActionCreator<Counter> {
    create_action(CounterAction::Increment).reducer(|s: &Counter| Counter {
        counter: s.counter + 1,
    })
}

// ============================================================================
// Epic - What happens in response
// ============================================================================

fn counting(actions: ActionStream<Counter>, _states: StateStream<Counter>) -> EpicOutput<Counter> {
    let increment = increment();
    actions
        .of_type(CounterAction::StartCounting)
        .switch_map_to(|| interval(Duration::from_millis(100)))
        .map(move |_| increment.create())
        .boxed()
}

fn load_config() -> Result<KernelConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(KernelConfig::from_json_str(&std::fs::read_to_string(path)?)?),
        None => Ok(KernelConfig::default().with_name("counter")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("counter=info".parse()?))
        .init();

    let kernel = Kernel::builder()
        .initial_state(Counter { counter: 1 })
        .named_epic("counting", counting)
        .config(load_config()?)
        .build()?;

    // Dispatched before anyone listens: buffered until the first subscriber.
    kernel.dispatch(create_action(CounterAction::StartCounting).create())?;

    let mut subscription = kernel.subscribe(|state: &Counter, action: &Action<Counter>| {
        tracing::info!(action = %action.name(), counter = state.counter, "transition");
    })?;

    let start = tokio::time::Instant::now();
    for t in [120u64, 220, 520] {
        tokio::time::sleep_until(start + Duration::from_millis(t)).await;
        println!("t={t}ms  counter = {}", kernel.state().counter);
    }

    subscription.unsubscribe();
    tokio::time::sleep(Duration::from_millis(300)).await;
    println!(
        "after unsubscribe: counter = {} (torn down: {})",
        kernel.state().counter,
        kernel.is_torn_down()
    );

    Ok(())
}
