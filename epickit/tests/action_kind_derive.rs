//! Tests for #[derive(ActionKind)] macro

use epickit::prelude::*;

#[test]
fn test_basic_derive() {
    #[derive(ActionKind, Clone, Copy, Debug, PartialEq, Eq)]
    enum Kind {
        StartCounting,
        Increment,
    }

    assert_eq!(Kind::StartCounting.action_type().name(), "start_counting");
    assert_eq!(Kind::Increment.action_type(), ActionType::new("increment"));
    assert_eq!(ActionType::from(Kind::Increment), ActionType::new("increment"));
}

#[test]
fn test_prefix_and_rename() {
    #[derive(ActionKind, Clone, Copy, Debug)]
    #[action_kind(prefix = "counter/")]
    enum Kind {
        StartCounting,
        #[action_kind(rename = "halt")]
        Stop,
    }

    assert_eq!(Kind::StartCounting.action_type().name(), "counter/start_counting");
    assert_eq!(Kind::Stop.action_type().name(), "counter/halt");
}

#[test]
fn test_all_variants_in_order() {
    #[derive(ActionKind, Clone, Copy, Debug, PartialEq, Eq)]
    enum Kind {
        A,
        B,
        C,
    }

    assert_eq!(Kind::ALL, &[Kind::A, Kind::B, Kind::C]);
}

#[test]
fn test_works_with_creators_and_filters() {
    #[derive(ActionKind, Clone, Copy, Debug)]
    enum Kind {
        Increment,
        Reset,
        Tick,
    }

    let increment = create_action::<u32>(Kind::Increment).reducer(|n| n + 1);
    let reset = create_action::<u32>(Kind::Reset).reducer(|_| 0);
    let tick = create_action::<u32>(Kind::Tick);

    let action = increment.create();
    assert!(action.is(Kind::Increment));
    assert!(!action.is(Kind::Reset));
    assert_eq!(action.name(), "increment");

    let is_mutation = filter_action::<u32>([Kind::Increment, Kind::Reset]);
    assert!(is_mutation(&increment.create()));
    assert!(is_mutation(&reset.create()));
    assert!(!is_mutation(&tick.create()));

    let is_tick = filter_action::<u32>(Kind::Tick);
    assert!(is_tick(&tick.create()));
    assert!(!is_tick(&reset.create()));
}

#[tokio::test]
async fn test_of_type_accepts_derived_kinds() {
    #[derive(ActionKind, Clone, Copy, Debug)]
    enum Kind {
        Ping,
        Pong,
    }

    let actions: Vec<Action<()>> = vec![
        create_action(Kind::Ping).create(),
        create_action(Kind::Pong).create(),
        create_action(Kind::Ping).create(),
    ];
    let pings: Vec<_> = futures::stream::iter(actions)
        .of_type(Kind::Ping)
        .map(|a| a.name())
        .collect()
        .await;

    assert_eq!(pings, vec!["ping", "ping"]);
}
