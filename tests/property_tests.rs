// Property-based tests using proptest for the envelope codec
//
// These generate random commands and random bytes to check that decoding
// inverts encoding and that no input can panic the decoder.

#[cfg(test)]
mod property_tests {
    use post_relay::relay::codec::{decode, encode};
    use post_relay::relay::consumer::backoff;
    use post_relay::relay::constants::RETRY_BACKOFF_CEILING_MS;
    use post_relay::relay::{
        EntityKind, FieldKind, FieldValue, MutationCommand, Operation, RelayError, Route,
    };
    use proptest::prelude::*;
    use std::time::Duration;

    /// Build a command for `route`, filling column i from `ints[i]` or `texts[i]`
    fn command_for(
        route: Route,
        id: i64,
        ints: &[Option<i64>],
        texts: &[Option<String>],
    ) -> MutationCommand {
        if route.operation == Operation::Delete {
            return MutationCommand::delete(route.entity, id);
        }
        let mut command = MutationCommand::update(route.entity, id);
        for (i, (name, kind)) in route.entity.columns().iter().enumerate() {
            let value = match kind {
                FieldKind::Integer => ints.get(i).cloned().flatten().map(FieldValue::from),
                FieldKind::Text => texts.get(i).cloned().flatten().map(FieldValue::from),
            };
            if let Some(value) = value {
                command = command.with_field(*name, value);
            }
        }
        command
    }

    fn columns() -> impl Strategy<Value = (Vec<Option<i64>>, Vec<Option<String>>)> {
        (
            proptest::collection::vec(proptest::option::of(any::<i64>()), 3),
            proptest::collection::vec(proptest::option::of(".*"), 3),
        )
    }

    proptest! {
        #[test]
        fn test_post_update_roundtrip(
            id in 1i64..i64::MAX,
            user_id in proptest::option::of(any::<i64>()),
            title in proptest::option::of(".*"),
            content in proptest::option::of(".*"),
        ) {
            // Property: decode(encode(c)) == c for any valid post update
            let mut command = MutationCommand::update(EntityKind::Post, id);
            if let Some(v) = user_id {
                command = command.with_field("user_id", v);
            }
            if let Some(v) = title {
                command = command.with_field("title", v);
            }
            if let Some(v) = content {
                command = command.with_field("content", v);
            }

            let payload = encode(&command).unwrap();
            let decoded = decode(Route::new(EntityKind::Post, Operation::Update), &payload).unwrap();
            prop_assert_eq!(decoded, command);
        }

        #[test]
        fn test_log_update_roundtrip(id in 1i64..i64::MAX, (ints, texts) in columns()) {
            // Property: every subset of log columns survives the wire
            let route = Route::new(EntityKind::Log, Operation::Update);
            let command = command_for(route, id, &ints, &texts);

            let payload = encode(&command).unwrap();
            prop_assert_eq!(decode(route, &payload).unwrap(), command);
        }

        #[test]
        fn test_roundtrip_every_route(
            route in proptest::sample::select(Route::ALL.to_vec()),
            id in 1i64..i64::MAX,
            (ints, texts) in columns(),
        ) {
            // Property: decode(encode(c)) == c on the route c was built for
            let command = command_for(route, id, &ints, &texts);

            let payload = encode(&command).unwrap();
            let decoded = decode(route, &payload).unwrap();
            prop_assert_eq!(decoded.route(), route);
            prop_assert_eq!(decoded, command);
        }

        #[test]
        fn test_arbitrary_bytes_never_panic(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            // Property: garbage either decodes or is MalformedEnvelope, never a panic
            for route in Route::ALL {
                match decode(route, &payload) {
                    Ok(command) => prop_assert!(command.target_id > 0),
                    Err(e) => prop_assert!(
                        matches!(e, RelayError::MalformedEnvelope { .. }),
                        "unexpected error: {:?}",
                        e
                    ),
                }
            }
        }

        #[test]
        fn test_non_positive_ids_rejected(id in i64::MIN..=0i64) {
            let payload = format!(r#"{{"id":"{}"}}"#, id);
            let result = decode(Route::new(EntityKind::Log, Operation::Delete), payload.as_bytes());
            prop_assert!(
                matches!(result, Err(RelayError::MalformedEnvelope { .. })),
                "expected MalformedEnvelope for id {}",
                id
            );
        }

        #[test]
        fn test_backoff_bounded_and_monotonic(base in 1u64..60_000u64, attempt in 0u32..64u32) {
            let current = backoff(base, attempt);
            prop_assert!(current <= Duration::from_millis(RETRY_BACKOFF_CEILING_MS));
            prop_assert!(backoff(base, attempt + 1) >= current);
        }
    }
}
