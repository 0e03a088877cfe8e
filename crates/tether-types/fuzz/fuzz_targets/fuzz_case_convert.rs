#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_types::case::{to_camel, to_snake};

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    let camel = to_camel(&value);
    assert_eq!(to_camel(&camel), camel);

    let snake = to_snake(&value);
    assert_eq!(to_snake(&snake), snake);
});
