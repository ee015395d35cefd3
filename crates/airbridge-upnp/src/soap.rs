//! SOAP envelope parsing and response building.

use std::sync::LazyLock;

use regex::Regex;

static ACTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<u:(\w+)").unwrap());

/// The action name inside a SOAP request body.
pub fn parse_action(body: &str) -> Option<String> {
    ACTION.captures(body).map(|c| c[1].to_string())
}

/// Extract one argument element's text content.
pub fn argument<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(&body[start..end])
}

/// A successful SOAP response envelope.
pub fn response(action: &str, service: &str, params: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body><u:{action}Response xmlns:u="urn:schemas-upnp-org:service:{service}:1">{params}</u:{action}Response></s:Body>
</s:Envelope>"#
    )
}

/// A SOAP fault envelope carrying a UPnPError (served with HTTP 500).
pub fn fault(error_code: u16, description: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body><s:Fault>
    <faultcode>s:Client</faultcode>
    <faultstring>UPnPError</faultstring>
    <detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
      <errorCode>{error_code}</errorCode>
      <errorDescription>{description}</errorDescription>
    </UPnPError></detail>
  </s:Fault></s:Body>
</s:Envelope>"#
    )
}
