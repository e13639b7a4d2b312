/// パースマシンの制限設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineLimits {
    /// 最大行長 (デフォルト: 8KB)
    ///
    /// スタートライン・ヘッダー行・チャンクサイズ行の組み立て済み長さ。
    /// キャリーオーバーバッファの肥大化もこの値で抑止する。
    pub max_line_length: usize,
    /// 最大ヘッダー数 (デフォルト: 100)
    ///
    /// トレーラーのリストにも同じ上限を適用する。
    pub max_headers: usize,
}

impl Default for MachineLimits {
    fn default() -> Self {
        Self {
            max_line_length: 8 * 1024, // 8KB
            max_headers: 100,
        }
    }
}

impl MachineLimits {
    /// 制限なしの設定を作成
    pub fn unlimited() -> Self {
        Self {
            max_line_length: usize::MAX,
            max_headers: usize::MAX,
        }
    }
}
