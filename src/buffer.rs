//! バイトバッファユーティリティ
//!
//! 分割されて届くバイト列から CRLF 区切りの行を組み立てるための
//! キャリーオーバーバッファと、ヘッダー行の文字列化ヘルパーを提供する。

/// `buf` 内で最初に CRLF が現れる位置 (CR の位置) を返す
pub fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// バイト列を 1 バイト = 1 文字で文字列化する (ISO-8859-1 相当)
///
/// ヘッダー値に現れる obs-text (0x80-0xFF) を欠落させずに保持する。
pub fn latin1_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// `LineBuffer::split_line()` の結果
#[derive(Debug, PartialEq, Eq)]
pub enum LineScan {
    /// 完全な行が得られた。`line` に CRLF は含まない。
    /// `consumed` は入力バッファから消費したバイト数 (終端 CRLF を含む)
    Found { line: Vec<u8>, consumed: usize },
    /// CRLF がまだ到着していない。入力バッファ全体を取り込んだ
    Partial,
}

/// CRLF 区切り行のキャリーオーバーバッファ
///
/// 行の途中でバッファが尽きた場合、未消費バイトをここへ退避し、
/// 次の入力バッファの先頭へ論理的に連結する。CR と LF が別々の
/// バッファに分かれて届いても行の終端として検出できる。
///
/// 不変条件: 内部データは完全な CRLF を含まない (末尾の CR は可)。
#[derive(Debug, Default)]
pub struct LineBuffer {
    data: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// 退避済みバイトと `buf` を連結した列から次の行を切り出す
    ///
    /// 行が完成しない場合は `buf` 全体を取り込み `Partial` を返す。
    /// LF 単独は終端とみなさない。LF を伴わない CR は行内容として残る。
    pub fn split_line(&mut self, buf: &[u8]) -> LineScan {
        // 退避分の末尾 CR + 今回の先頭 LF で行が境界をまたいで終わるケース
        if self.data.last() == Some(&b'\r') && buf.first() == Some(&b'\n') {
            let mut line = std::mem::take(&mut self.data);
            line.pop();
            return LineScan::Found { line, consumed: 1 };
        }
        match find_crlf(buf) {
            Some(i) => {
                let mut line = std::mem::take(&mut self.data);
                line.extend_from_slice(&buf[..i]);
                LineScan::Found {
                    line,
                    consumed: i + 2,
                }
            }
            None => {
                self.data.extend_from_slice(buf);
                LineScan::Partial
            }
        }
    }
}
