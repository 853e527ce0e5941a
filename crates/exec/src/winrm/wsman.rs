// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WS-Management SOAP envelope construction and response scraping.
//!
//! Only the four operations the executor needs: create a `cmd` shell, run a
//! command in it, receive output, delete the shell. Responses are scraped
//! with targeted tag extraction rather than a full XML parse, since the server
//! side is WinRM, whose element names are fixed by the protocol.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const ENVELOPE_HEADER: &str = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd" xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell" xmlns:p="http://schemas.microsoft.com/wbem/wsman/1/wsman.xsd">"#;

const SHELL_RESOURCE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";

fn header(endpoint: &str, action: &str, message_id: &str, shell_id: Option<&str>) -> String {
    let selector = match shell_id {
        Some(id) => format!(
            r#"<w:SelectorSet><w:Selector Name="ShellId">{id}</w:Selector></w:SelectorSet>"#
        ),
        None => String::new(),
    };
    format!(
        r#"<s:Header>
<a:To>{endpoint}</a:To>
<a:ReplyTo><a:Address s:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address></a:ReplyTo>
<w:ResourceURI s:mustUnderstand="true">{SHELL_RESOURCE}</w:ResourceURI>
<a:Action s:mustUnderstand="true">{action}</a:Action>
<w:MaxEnvelopeSize s:mustUnderstand="true">153600</w:MaxEnvelopeSize>
<a:MessageID>uuid:{message_id}</a:MessageID>
<w:OperationTimeout>PT60S</w:OperationTimeout>
{selector}</s:Header>"#,
        endpoint = xml_escape(endpoint),
    )
}

/// Envelope opening a remote `cmd` shell.
pub fn create_shell_envelope(endpoint: &str, message_id: &str) -> String {
    format!(
        "{ENVELOPE_HEADER}{header}<s:Body>\
<rsp:Shell><rsp:InputStreams>stdin</rsp:InputStreams>\
<rsp:OutputStreams>stdout stderr</rsp:OutputStreams></rsp:Shell>\
</s:Body></s:Envelope>",
        header = header(
            endpoint,
            "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create",
            message_id,
            None
        ),
    )
}

/// Envelope running one command line inside an open shell.
pub fn command_envelope(
    endpoint: &str,
    message_id: &str,
    shell_id: &str,
    command: &str,
) -> String {
    format!(
        "{ENVELOPE_HEADER}{header}<s:Body>\
<rsp:CommandLine><rsp:Command>{cmd}</rsp:Command></rsp:CommandLine>\
</s:Body></s:Envelope>",
        header = header(
            endpoint,
            "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command",
            message_id,
            Some(shell_id)
        ),
        cmd = xml_escape(command),
    )
}

/// Envelope polling for output of a running command.
pub fn receive_envelope(
    endpoint: &str,
    message_id: &str,
    shell_id: &str,
    command_id: &str,
) -> String {
    format!(
        "{ENVELOPE_HEADER}{header}<s:Body>\
<rsp:Receive><rsp:DesiredStream CommandId=\"{command_id}\">stdout stderr</rsp:DesiredStream></rsp:Receive>\
</s:Body></s:Envelope>",
        header = header(
            endpoint,
            "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive",
            message_id,
            Some(shell_id)
        ),
    )
}

/// Envelope tearing the shell down.
pub fn delete_envelope(endpoint: &str, message_id: &str, shell_id: &str) -> String {
    format!(
        "{ENVELOPE_HEADER}{header}<s:Body/></s:Envelope>",
        header = header(
            endpoint,
            "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete",
            message_id,
            Some(shell_id)
        ),
    )
}

/// Pull the ShellId out of a Create response.
pub fn extract_shell_id(xml: &str) -> Option<String> {
    extract_selector(xml, "ShellId").or_else(|| extract_tag_text(xml, "rsp:ShellId"))
}

/// Pull the CommandId out of a Command response.
pub fn extract_command_id(xml: &str) -> Option<String> {
    extract_tag_text(xml, "rsp:CommandId")
}

/// Decoded portion of one Receive response.
#[derive(Debug, Default)]
pub struct ReceiveChunk {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub done: bool,
    pub exit_code: Option<i32>,
}

/// Scrape the streams, command state, and exit code out of a Receive
/// response. Malformed base64 chunks are skipped rather than fatal.
pub fn parse_receive(xml: &str) -> ReceiveChunk {
    let mut chunk = ReceiveChunk::default();
    let mut rest = xml;
    while let Some(start) = rest.find("<rsp:Stream ") {
        let tail = &rest[start..];
        let Some(open_end) = tail.find('>') else { break };
        let open_tag = &tail[..open_end];
        let body_start = open_end + 1;
        // Self-closing stream elements carry no data
        if open_tag.ends_with('/') {
            rest = &tail[body_start..];
            continue;
        }
        let Some(close) = tail[body_start..].find("</rsp:Stream>") else { break };
        let body = &tail[body_start..body_start + close];
        if let Ok(bytes) = BASE64.decode(body.trim()) {
            if open_tag.contains(r#"Name="stdout""#) {
                chunk.stdout.extend_from_slice(&bytes);
            } else if open_tag.contains(r#"Name="stderr""#) {
                chunk.stderr.extend_from_slice(&bytes);
            }
        }
        rest = &tail[body_start + close..];
    }

    if let Some(state_at) = xml.find("<rsp:CommandState") {
        chunk.done = xml[state_at..]
            .split('>')
            .next()
            .is_some_and(|open| open.contains("CommandState/Done"));
    }
    chunk.exit_code = extract_tag_text(xml, "rsp:ExitCode").and_then(|s| s.trim().parse().ok());
    chunk
}

/// Whether a response is a SOAP fault, with the reason text if present.
pub fn fault_reason(xml: &str) -> Option<String> {
    if !xml.contains(":Fault>") && !xml.contains("<s:Fault") {
        return None;
    }
    Some(
        extract_tag_text(xml, "s:Text")
            .unwrap_or_else(|| "unspecified WS-Man fault".to_string()),
    )
}

fn extract_tag_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let start = xml.find(&open)?;
    let tail = &xml[start..];
    let body_start = tail.find('>')? + 1;
    let body_end = tail.find(&close)?;
    if body_end <= body_start {
        return None;
    }
    Some(tail[body_start..body_end].to_string())
}

fn extract_selector(xml: &str, name: &str) -> Option<String> {
    let marker = format!(r#"Name="{name}">"#);
    let start = xml.find(&marker)? + marker.len();
    let end = xml[start..].find('<')? + start;
    Some(xml[start..end].to_string())
}

pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Base64 of the UTF-16LE encoding, the `-EncodedCommand` input format.
pub fn encode_powershell(script: &str) -> String {
    let bytes: Vec<u8> = script.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    BASE64.encode(bytes)
}
