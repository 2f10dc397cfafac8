//! Runtime instance generation (`CATALINA_BASE`)
//!
//! Clones the distribution's `conf/` tree into an isolated instance directory
//! and rewrites the listener declarations in `server.xml`: HTTP port remapped,
//! bind address injected for non-default hosts, shutdown port disabled, AJP
//! connector commented out. The distribution itself is never mutated.
//!
//! The rewrite is structural, not a full XML parse: it touches exactly the
//! attributes it needs and leaves everything else byte-for-byte alone.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use catdev_core::prelude::*;
use catdev_core::ServerConfig;

use crate::fsutil::copy_tree;

/// Subdirectories every instance needs
const INSTANCE_SUBDIRS: &[&str] = &["conf", "logs", "temp", "webapps", "work"];

/// Sentinel port value Tomcat treats as "shutdown listener disabled"
const SHUTDOWN_DISABLED: &str = "-1";

/// Hosts that mean "bind everything" and need no address attribute
const WILDCARD_HOSTS: &[&str] = &["localhost", "0.0.0.0", "::", ""];

/// Matches a whole `<Connector ...>` element, across line breaks.
static CONNECTOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Connector\b[^>]*>").expect("Connector pattern is valid"));

/// Matches a quoted `port` attribute inside an element.
static PORT_ATTR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"port\s*=\s*"[^"]*""#).expect("port attribute pattern is valid"));

/// Matches the opening of a quoted `address` attribute.
static ADDRESS_ATTR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\baddress\s*=\s*""#).expect("address attribute pattern is valid")
});

/// Captures the `<Server ... port="...">` attribute for rewriting.
static SERVER_PORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(<Server\b[^>]*?port\s*=\s*")[^"]*(")"#).expect("Server port pattern is valid")
});

/// Check whether a previously generated instance can be reused without
/// regeneration: configuration subtree present with the base server config.
pub fn is_valid_instance(base: &Path) -> bool {
    base.join("conf").join("server.xml").is_file()
}

/// Produces an isolated instance directory from a distribution.
pub struct InstanceGenerator {
    config: ServerConfig,
}

impl InstanceGenerator {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Generate the instance directory tree and rewritten configuration.
    ///
    /// Safe to run repeatedly; later runs overwrite the configuration files
    /// of earlier ones. Callers should skip this entirely when
    /// [`is_valid_instance`] already passes.
    pub fn generate(&self) -> Result<PathBuf> {
        let base = &self.config.catalina_base;

        for sub in INSTANCE_SUBDIRS {
            std::fs::create_dir_all(base.join(sub))?;
        }

        let source_conf = self.config.catalina_home.join("conf");
        if !source_conf.is_dir() {
            return Err(Error::instance(format!(
                "distribution has no conf directory: {}",
                source_conf.display()
            )));
        }
        copy_tree(&source_conf, &base.join("conf"))?;

        let server_xml = base.join("conf").join("server.xml");
        let original = std::fs::read_to_string(&server_xml).map_err(|_| {
            Error::instance(format!("missing base config: {}", server_xml.display()))
        })?;
        let rewritten = rewrite_server_xml(&original, &self.config.host, self.config.port);
        std::fs::write(&server_xml, rewritten)?;

        info!(
            "Generated instance at {} (listener {}:{})",
            base.display(),
            self.config.host,
            self.config.port
        );
        Ok(base.clone())
    }
}

/// Apply all listener rewrites to a `server.xml` document.
pub fn rewrite_server_xml(xml: &str, host: &str, port: u16) -> String {
    let xml = rewrite_http_connector(xml, host, port);
    let xml = disable_shutdown_port(&xml);
    comment_out_ajp_connector(&xml)
}

/// Is the byte offset inside an XML comment?
fn in_comment(xml: &str, offset: usize) -> bool {
    let before = &xml[..offset];
    match (before.rfind("<!--"), before.rfind("-->")) {
        (Some(open), Some(close)) => open > close,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Rewrite the HTTP/1.1 connector's port and, for a non-default host,
/// inject a bind address if one is not already present.
fn rewrite_http_connector(xml: &str, host: &str, port: u16) -> String {
    let wants_address = !WILDCARD_HOSTS.contains(&host);

    let mut output = String::with_capacity(xml.len());
    let mut cursor = 0;
    for found in CONNECTOR_PATTERN.find_iter(xml) {
        output.push_str(&xml[cursor..found.start()]);
        cursor = found.end();

        let element = found.as_str();
        if !element.contains(r#"protocol="HTTP/1.1""#) || in_comment(xml, found.start()) {
            output.push_str(element);
            continue;
        }

        let mut rewritten = PORT_ATTR_PATTERN
            .replace(element, format!(r#"port="{port}""#).as_str())
            .into_owned();
        if wants_address && !ADDRESS_ATTR_PATTERN.is_match(&rewritten) {
            // Insert right after the port attribute to keep the diff minimal.
            if let Some(found_port) = PORT_ATTR_PATTERN.find(&rewritten) {
                rewritten.insert_str(found_port.end(), &format!(r#" address="{host}""#));
            }
        }
        output.push_str(&rewritten);
    }
    output.push_str(&xml[cursor..]);
    output
}

/// Disable the administrative shutdown listener by rewriting its port to the
/// sentinel value.
fn disable_shutdown_port(xml: &str) -> String {
    SERVER_PORT_PATTERN
        .replace(xml, format!("${{1}}{SHUTDOWN_DISABLED}${{2}}").as_str())
        .into_owned()
}

/// Comment out any uncommented AJP connector; it would otherwise bind an
/// unwanted port in local development.
fn comment_out_ajp_connector(xml: &str) -> String {
    let mut output = String::with_capacity(xml.len());
    let mut cursor = 0;
    for found in CONNECTOR_PATTERN.find_iter(xml) {
        output.push_str(&xml[cursor..found.start()]);
        cursor = found.end();

        let element = found.as_str();
        if element.contains(r#"protocol="AJP/1.3""#) && !in_comment(xml, found.start()) {
            output.push_str("<!-- ");
            output.push_str(element);
            output.push_str(" -->");
        } else {
            output.push_str(element);
        }
    }
    output.push_str(&xml[cursor..]);
    output
}
