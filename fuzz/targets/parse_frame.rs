#![no_main]

use libfuzzer_sys::fuzz_target;
use qmon::network::protocol::ClientFrame;

fuzz_target!(|data: &[u8]| {
    // Движок отбрасывает не-UTF-8 до разбора.
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(frame) = ClientFrame::parse(line) {
        // Успешно разобранный фрейм всегда начинается с известной команды.
        let command = line.split_whitespace().next().unwrap_or_default();
        assert!(command.eq_ignore_ascii_case(frame.name()));
    }
});
