//! BUILD: turning an operation and its parameters into a draft request.

use bytes::Bytes;
use stowage_core::{ByteSource, Endpoints, Region, Request, Scheme, uri_encode_path};
use stowage_xml::{S3_NAMESPACE, to_xml_with_namespace};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::operation::{OperationSpec, Params, Protocol, Target};

/// Where requests are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// URL scheme.
    pub scheme: Scheme,
    /// Host name.
    pub host: String,
    /// Explicit port.
    pub port: Option<u16>,
}

impl Endpoint {
    /// Parse an endpoint override: `host`, `host:port`, optionally prefixed
    /// with `http://` or `https://`, which then overrides `default_scheme`.
    /// IPv6 hosts are bracketed, as in `[::1]:9000`, and keep their brackets.
    pub fn parse(endpoint: &str, default_scheme: Scheme) -> Result<Self, ClientError> {
        let (scheme, rest) = if let Some(rest) = endpoint.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = endpoint.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            (default_scheme, endpoint)
        };
        let invalid = || ClientError::Config(format!("invalid endpoint: {endpoint}"));
        let authority = rest.trim_end_matches('/');
        if authority.is_empty() || authority.contains('/') {
            return Err(invalid());
        }

        // A colon inside the brackets belongs to the address.
        let port_split = authority
            .rsplit_once(':')
            .filter(|(_, port)| !port.contains(']'));
        let (host, port) = match port_split {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ClientError::Config(format!("invalid endpoint port: {endpoint}")))?;
                (host, Some(port))
            }
            None => (authority, None),
        };
        let bracketed = host.starts_with('[');
        if bracketed != host.ends_with(']') || (!bracketed && host.contains(':')) || host == "[]" {
            return Err(invalid());
        }
        Ok(Self {
            scheme,
            host: host.to_owned(),
            port,
        })
    }

    /// Endpoint for `service` under `config`: the override when set, otherwise
    /// the bundled region table.
    pub fn resolve(
        config: &ClientConfig,
        endpoints: &Endpoints,
        service: &str,
    ) -> Result<Self, ClientError> {
        if let Some(endpoint) = &config.endpoint {
            return Self::parse(endpoint, config.scheme());
        }
        let scheme = config.scheme();
        let entry = endpoints.entry(&config.region, service).ok_or_else(|| {
            ClientError::Config(format!(
                "no endpoint for service {service} in region {}",
                config.region
            ))
        })?;
        if !entry.supports(scheme) {
            return Err(ClientError::Config(format!(
                "{} does not support {scheme}",
                entry.hostname
            )));
        }
        Ok(Self {
            scheme,
            host: entry.hostname.clone(),
            port: None,
        })
    }
}

fn is_ip_literal(host: &str) -> bool {
    host.starts_with('[') || host.parse::<std::net::Ipv4Addr>().is_ok()
}

/// Whether a bucket can be addressed through the host name.
///
/// Names must be valid DNS labels; over HTTPS a dot would break wildcard
/// certificate matching, so dotted names use path style there.
#[must_use]
pub fn is_dns_compatible(bucket: &str, secure: bool) -> bool {
    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    };
    (3..=63).contains(&bucket.len())
        && !(secure && bucket.contains('.'))
        && bucket.split('.').all(valid_label)
        && bucket.parse::<std::net::Ipv4Addr>().is_err()
}

/// Build the draft request for one call.
pub fn build_request(
    spec: &OperationSpec,
    params: Params,
    endpoint: &Endpoint,
    config: &ClientConfig,
) -> Result<Request, ClientError> {
    let mut request = Request::new(spec.method.clone(), endpoint.scheme, endpoint.host.clone());
    request.port = endpoint.port;
    request.region = Region::new(&config.region);
    request.endpoint_prefix = spec.service.to_owned();

    match spec.protocol {
        Protocol::RestXml | Protocol::RestJson => address_resource(&mut request, spec, &params, config)?,
        Protocol::JsonRpc {
            target_prefix,
            json_version,
        } => {
            request.insert_header("x-amz-target", &format!("{target_prefix}.{}", spec.name))?;
            request.insert_header(
                "content-type",
                &format!("application/x-amz-json-{json_version}"),
            )?;
        }
    }

    if let Some(subresource) = spec.subresource {
        request.push_query(subresource, "");
    }
    request.query.extend(params.query);

    for (name, value) in &params.headers {
        request.insert_header(name, value)?;
    }

    request.body = encode_body(spec, &mut request, params.body, params.xml, params.json)?;
    Ok(request)
}

fn address_resource(
    request: &mut Request,
    spec: &OperationSpec,
    params: &Params,
    config: &ClientConfig,
) -> Result<(), ClientError> {
    let bucket = match spec.target {
        Target::Service => return Ok(()),
        Target::Bucket | Target::Object => params.bucket.as_deref().ok_or_else(|| {
            ClientError::InvalidRequest(format!("{} requires a bucket", spec.name))
        })?,
    };
    let key = match spec.target {
        Target::Object => Some(params.key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
            ClientError::InvalidRequest(format!("{} requires a key", spec.name))
        })?),
        _ => None,
    };

    let virtual_hosted = !config.force_path_style
        && !is_ip_literal(&request.host)
        && is_dns_compatible(bucket, request.scheme == Scheme::Https);
    let encoded_key = key.map(uri_encode_path);
    if virtual_hosted {
        request.host = format!("{bucket}.{}", request.host);
        request.path = match encoded_key {
            Some(key) => format!("/{key}"),
            None => "/".to_owned(),
        };
    } else {
        request.path = match encoded_key {
            Some(key) => format!("/{}/{key}", uri_encode_path(bucket)),
            None => format!("/{}", uri_encode_path(bucket)),
        };
    }
    request.bucket = Some(bucket.to_owned());
    request.virtual_hosted = virtual_hosted;
    Ok(())
}

fn encode_body(
    spec: &OperationSpec,
    request: &mut Request,
    body: ByteSource,
    xml: Option<stowage_xml::Value>,
    json: Option<serde_json::Value>,
) -> Result<ByteSource, ClientError> {
    if let Some(value) = xml {
        let (root, grammar) = spec.request.ok_or_else(|| {
            ClientError::InvalidRequest(format!("{} takes no XML body", spec.name))
        })?;
        let document = to_xml_with_namespace(root, S3_NAMESPACE, &value, grammar)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        if request.header("content-type").is_none() {
            request.insert_header("content-type", "application/xml")?;
        }
        request.insert_header("content-md5", &stowage_auth::content_md5(&document))?;
        return Ok(ByteSource::from(document));
    }

    if let Some(value) = json {
        let document =
            serde_json::to_vec(&value).map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        if request.header("content-type").is_none() {
            request.insert_header("content-type", "application/json")?;
        }
        return Ok(ByteSource::from(document));
    }

    if matches!(spec.protocol, Protocol::JsonRpc { .. }) && matches!(body, ByteSource::Empty) {
        return Ok(ByteSource::Bytes(Bytes::from_static(b"{}")));
    }
    Ok(body)
}
