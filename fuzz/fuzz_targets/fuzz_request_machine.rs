#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_nodewire::{ParsingMachine, ParsingMode};

// 任意のバイト列を投入してもパニックせず、消費量の不変条件を守ること
fuzz_target!(|data: &[u8]| {
    let mut machine = ParsingMachine::new(ParsingMode::Request);
    let mut rest = data;
    loop {
        match machine.parse(Some(rest)) {
            Ok(r) => {
                assert!(r.consumed() <= rest.len());
                if r.is_complete() || r.consumed() == 0 {
                    break;
                }
                rest = &rest[r.consumed()..];
            }
            Err(_) => {
                assert!(machine.is_error());
                // エラーは終端的
                assert!(machine.parse(Some(b"GET / HTTP/1.1\r\n\r\n")).is_err());
                break;
            }
        }
        if rest.is_empty() {
            break;
        }
    }
    // 入力終端の通知もパニックしない
    let _ = machine.parse(None);
});
