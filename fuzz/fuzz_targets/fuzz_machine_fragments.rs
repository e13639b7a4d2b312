#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shiguredo_nodewire::{ParsingMachine, ParsingMode};

#[derive(Arbitrary, Debug)]
struct FuzzFragments {
    data: Vec<u8>,
    split_hint: u8,
}

struct Outcome {
    body: Vec<u8>,
    headers: Option<Vec<(String, String)>>,
    complete: bool,
    error: bool,
}

fn run(mode: ParsingMode, data: &[u8], split_size: usize) -> Outcome {
    let mut machine = ParsingMachine::new(mode);
    let mut outcome = Outcome {
        body: Vec::new(),
        headers: None,
        complete: false,
        error: false,
    };
    for part in data.chunks(split_size.max(1)) {
        let mut rest = part;
        loop {
            match machine.parse(Some(rest)) {
                Ok(mut r) => {
                    if let Some(b) = r.body() {
                        outcome.body.extend_from_slice(b);
                    }
                    if let Some(h) = r.take_headers() {
                        outcome.headers = Some(h);
                    }
                    outcome.complete = r.is_complete();
                    if r.consumed() == 0 {
                        break;
                    }
                    rest = &rest[r.consumed()..];
                    if rest.is_empty() {
                        break;
                    }
                }
                Err(_) => {
                    outcome.error = true;
                    return outcome;
                }
            }
        }
        if outcome.complete {
            break;
        }
    }
    outcome
}

// 分割の仕方を変えても、同じ入力からは同じメッセージが組み立つこと
fuzz_target!(|input: FuzzFragments| {
    let split_size = (input.split_hint as usize % 64) + 1;
    for mode in [ParsingMode::Request, ParsingMode::Response] {
        let whole = run(mode, &input.data, input.data.len().max(1));
        let split = run(mode, &input.data, split_size);
        assert_eq!(whole.error, split.error);
        if !whole.error {
            assert_eq!(whole.complete, split.complete);
            assert_eq!(whole.body, split.body);
            assert_eq!(whole.headers, split.headers);
        }
    }
});
