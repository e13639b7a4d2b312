//! ネットワークポリシー
//!
//! `connect` / `listen` の前に必ず照会されるコラボレーターインターフェース。
//! 却下された操作は OS レベルの syscall を発行する前に `EACCES` で失敗する。

use std::net::SocketAddr;

/// 接続・待ち受けの可否を判断するポリシー
pub trait NetworkPolicy {
    /// `address` への外向き接続を許可するか
    fn allow_connection(&self, address: &SocketAddr) -> bool;

    /// `address` での待ち受けを許可するか
    fn allow_listening(&self, address: &SocketAddr) -> bool;
}

/// すべて許可するデフォルトポリシー
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl NetworkPolicy for AllowAll {
    fn allow_connection(&self, _address: &SocketAddr) -> bool {
        true
    }

    fn allow_listening(&self, _address: &SocketAddr) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyLoopback;

    impl NetworkPolicy for DenyLoopback {
        fn allow_connection(&self, address: &SocketAddr) -> bool {
            !address.ip().is_loopback()
        }

        fn allow_listening(&self, _address: &SocketAddr) -> bool {
            false
        }
    }

    #[test]
    fn custom_policy() {
        let policy = DenyLoopback;
        let local: SocketAddr = "127.0.0.1:80".parse().unwrap();
        let remote: SocketAddr = "192.0.2.1:80".parse().unwrap();
        assert!(!policy.allow_connection(&local));
        assert!(policy.allow_connection(&remote));
        assert!(!policy.allow_listening(&local));
    }

    #[test]
    fn allow_all_allows() {
        let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
        assert!(AllowAll.allow_connection(&addr));
        assert!(AllowAll.allow_listening(&addr));
    }
}
