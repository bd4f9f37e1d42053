#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use qmon::{
    network::protocol::{escape_text, unescape_text, ServerFrame},
    Message, MessageId,
};

#[derive(Debug, Arbitrary)]
struct Delivery {
    seq: u64,
    link: String,
    text: String,
}

fuzz_target!(|input: Delivery| {
    let escaped = escape_text(&input.text);
    assert!(!escaped.contains('\n'));
    assert_eq!(unescape_text(&escaped), input.text);

    let frame = ServerFrame::Message {
        link: input.link.as_str().into(),
        message: Message::new(MessageId::new(input.seq), input.text.as_str()),
    };
    let encoded = frame.encode();
    assert!(encoded.ends_with('\n'));
});
