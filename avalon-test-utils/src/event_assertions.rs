use avalon_data::{
    EventRecord,
    EventType,
};

/// Returns every record of the given type, in log order.
pub fn events_of_type<'a>(events: &'a [EventRecord], event_type: EventType) -> Vec<&'a EventRecord> {
    events.iter().filter(|record| record.event_type == event_type).collect()
}

/// The first record of the given type, if any.
pub fn first_event_of_type(events: &[EventRecord], event_type: EventType) -> Option<&EventRecord> {
    events.iter().find(|record| record.event_type == event_type)
}

/// Panics unless at least one record of the given type is present.
pub fn assert_event_emitted(events: &[EventRecord], event_type: EventType) {
    assert!(
        events.iter().any(|record| record.event_type == event_type),
        "expected at least one {event_type:?} event, found none among {} events",
        events.len()
    );
}

/// Panics unless no record of the given type is present.
pub fn assert_event_not_emitted(events: &[EventRecord], event_type: EventType) {
    assert!(
        !events.iter().any(|record| record.event_type == event_type),
        "expected no {event_type:?} events, found {}",
        events_of_type(events, event_type).len()
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn finds_and_counts_events_by_type() {
        let events = vec![
            EventRecord::new(EventType::GameStart, json!({})),
            EventRecord::new(EventType::RoundStart, json!({"round": 1})),
            EventRecord::new(EventType::RoundStart, json!({"round": 2})),
        ];
        assert_event_emitted(&events, EventType::GameStart);
        assert_event_not_emitted(&events, EventType::GameEnd);
        assert_eq!(events_of_type(&events, EventType::RoundStart).len(), 2);
        assert!(first_event_of_type(&events, EventType::RoundStart).is_some());
    }
}
