use crate::error::{OperationKind, RelayError, map_io_error};
use std::borrow::Cow;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

/// 将 `:port` 形式的监听地址补全为 IPv6 通配地址 `[::]:port`。
///
/// 监听层以双栈方式绑定该地址，同时接受 IPv4 与 IPv6 客户端。
/// 其它形式原样返回，交给系统解析器处理。
pub(crate) fn normalize(addr: &str) -> Cow<'_, str> {
    let addr = addr.trim();
    if addr.starts_with(':') {
        Cow::Owned(format!("[::]{addr}"))
    } else {
        Cow::Borrowed(addr)
    }
}

/// 解析 `host:port`，返回全部候选地址。
///
/// `:port` 依次给出 `[::]:port` 与 `0.0.0.0:port`，后者供未启用 IPv6 的主机回退。
/// 解析失败或结果为空时，按 `kind` 映射为对应范围的 [`RelayError`]。
pub(crate) async fn resolve(addr: &str, kind: OperationKind) -> Result<Vec<SocketAddr>, RelayError> {
    let normalized = normalize(addr);
    let mut resolved: Vec<SocketAddr> = tokio::net::lookup_host(normalized.as_ref())
        .await
        .map_err(|err| map_io_error(kind, err))?
        .collect();
    if addr.trim().starts_with(':') {
        if let Some(port) = resolved.first().map(SocketAddr::port) {
            resolved.push(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
        }
    }
    if resolved.is_empty() {
        let err = io::Error::new(
            io::ErrorKind::NotFound,
            format!("no socket address resolved for `{addr}`"),
        );
        return Err(map_io_error(kind, err));
    }
    Ok(resolved)
}
