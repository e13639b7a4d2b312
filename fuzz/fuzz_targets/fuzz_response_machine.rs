#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_nodewire::{ParsingMachine, ParsingMode};

// レスポンスモード。close-delimited ボディへの遷移と EOF 処理を含めて
// 任意入力でパニックしないこと
fuzz_target!(|data: &[u8]| {
    let mut machine = ParsingMachine::new(ParsingMode::Response);
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
                break;
            }
        }
        if rest.is_empty() {
            break;
        }
    }
    match machine.parse(None) {
        Ok(r) => {
            // EOF 後に未完了のままということはない (正常クローズか完了)
            let _ = r.is_complete();
        }
        Err(_) => assert!(machine.is_error()),
    }
});
