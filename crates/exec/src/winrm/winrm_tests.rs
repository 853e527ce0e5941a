// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dw_core::{Platform, Secret, Transport};

fn windows_target() -> Target {
    Target {
        id: "WS01".into(),
        address: "10.0.0.5".into(),
        platform: Platform::Windows,
        transport: Transport::Winrm,
        credentials: "c1".into(),
        tls_verify: true,
        allow_plaintext: false,
        port: None,
    }
}

fn basic_cred() -> Credential {
    Credential {
        username: "admin".into(),
        secret: Secret::new("pw"),
        scheme: AuthScheme::Basic,
        negotiate_token: None,
    }
}

#[test]
fn default_endpoint_is_https_5986() {
    let endpoint = WinRmExecutor::endpoint(&windows_target()).unwrap();
    assert_eq!(endpoint, "https://10.0.0.5:5986/wsman");
}

#[test]
fn plaintext_port_without_opt_in_is_refused() {
    let mut target = windows_target();
    target.port = Some(5985);
    let err = WinRmExecutor::endpoint(&target).unwrap_err();
    assert!(matches!(err, ExecError::PlaintextRefused { .. }));
}

#[test]
fn plaintext_opt_in_uses_http_5985() {
    let mut target = windows_target();
    target.allow_plaintext = true;
    let endpoint = WinRmExecutor::endpoint(&target).unwrap();
    assert_eq!(endpoint, "http://10.0.0.5:5985/wsman");
}

#[test]
fn basic_scheme_builds_basic_auth() {
    let auth = WinRmExecutor::auth_for(&windows_target(), &basic_cred()).unwrap();
    assert!(matches!(auth, Auth::Basic { .. }));
}

#[test]
fn negotiate_scheme_requires_a_token() {
    let mut cred = basic_cred();
    cred.scheme = AuthScheme::Ntlm;
    let err = WinRmExecutor::auth_for(&windows_target(), &cred).unwrap_err();
    assert!(matches!(err, ExecError::Transport { .. }));

    cred.negotiate_token = Some(Secret::new("tok"));
    let auth = WinRmExecutor::auth_for(&windows_target(), &cred).unwrap();
    assert!(matches!(auth, Auth::Negotiate { .. }));
}

#[test]
fn ssh_schemes_are_rejected_for_winrm() {
    let mut cred = basic_cred();
    cred.scheme = AuthScheme::SshKey;
    assert!(WinRmExecutor::auth_for(&windows_target(), &cred).is_err());
}

#[tokio::test]
async fn missing_credentials_surface_before_any_network_io() {
    let exec = WinRmExecutor::new(CredentialStore::new(), CancellationToken::new()).unwrap();
    let err = exec
        .run_script(&windows_target(), "exit 0", &HashMap::new(), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::MissingCredentials { .. }));
}
