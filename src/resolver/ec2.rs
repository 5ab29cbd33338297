//! EC2 Query API implementation of the image catalog
//!
//! Speaks `Action=DescribeImages` over HTTPS with AWS Signature V4 request
//! signing. Credentials come from the environment the hosting platform
//! injects; the region comes from the filter, falling back to the platform
//! default.
//!
//! The Query API answers in XML. Only the `<imageId>`/`<name>` pair of each
//! image is consumed, so the client extracts those two fields positionally
//! instead of carrying a full XML parser.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::debug;

use super::{ImageCatalog, ImageFilter, ImageRecord};
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// EC2 Query API version the request is pinned to
const API_VERSION: &str = "2016-11-15";

/// Form content type; part of the signature, so it must match the request
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// `YYYYMMDD'T'HHMMSS'Z'` timestamp for the x-amz-date header
const AMZ_DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

/// `YYYYMMDD` date for the credential scope
const SCOPE_DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day]");

/// Static AWS credentials injected by the hosting platform
#[derive(Clone)]
struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::configuration("AWS_ACCESS_KEY_ID is unset"))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::configuration("AWS_SECRET_ACCESS_KEY is unset"))?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

/// Image catalog backed by the EC2 `DescribeImages` operation
pub struct Ec2ImageCatalog {
    client: reqwest::Client,
    credentials: Credentials,
    default_region: Option<String>,
    endpoint_override: Option<String>,
}

impl Ec2ImageCatalog {
    /// Build a catalog client from the platform environment
    ///
    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and optionally
    /// `AWS_SESSION_TOKEN`; the default region comes from `AWS_REGION` (or
    /// `AWS_DEFAULT_REGION`). Fails fast if credentials are missing.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            credentials: Credentials::from_env()?,
            default_region: std::env::var("AWS_REGION")
                .ok()
                .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok()),
            endpoint_override: None,
        })
    }

    /// Override the service endpoint (VPC interface endpoints)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    fn endpoint(&self, region: &str) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://ec2.{region}.amazonaws.com/"))
    }
}

#[async_trait]
impl ImageCatalog for Ec2ImageCatalog {
    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>> {
        let region = filter
            .region
            .as_deref()
            .or(self.default_region.as_deref())
            .ok_or_else(|| {
                Error::configuration(
                    "no region: the event carried no Region property and AWS_REGION is unset",
                )
            })?;

        let endpoint = self.endpoint(region);
        let host = host_of(&endpoint)?;

        let now = OffsetDateTime::now_utc();
        let amz_date = now
            .format(AMZ_DATE_FORMAT)
            .map_err(|e| Error::catalog(format!("timestamp formatting failed: {e}")))?;
        let scope_date = now
            .format(SCOPE_DATE_FORMAT)
            .map_err(|e| Error::catalog(format!("timestamp formatting failed: {e}")))?;

        let body = form_body(filter);
        let ctx = SigningContext {
            host: &host,
            amz_date: &amz_date,
            scope_date: &scope_date,
            region,
            session_token: self.credentials.session_token.as_deref(),
        };
        let authorization = authorization_header(&self.credentials, &ctx, &body);

        let mut request = self
            .client
            .post(&endpoint)
            .header("content-type", FORM_CONTENT_TYPE)
            .header("x-amz-date", &amz_date)
            .header("authorization", authorization);
        if let Some(token) = &self.credentials.session_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| Error::catalog(format!("DescribeImages request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::catalog(format!("DescribeImages response unreadable: {e}")))?;

        if !status.is_success() {
            let detail = extract_error_message(&text).unwrap_or_else(|| status.to_string());
            return Err(Error::catalog(format!("DescribeImages call failed: {detail}")));
        }

        let records = parse_describe_images(&text);
        debug!(count = records.len(), region, "DescribeImages returned images");
        Ok(records)
    }
}

/// Host header value for signing, including any non-default port
fn host_of(endpoint: &str) -> Result<String> {
    let url = reqwest::Url::parse(endpoint)
        .map_err(|e| Error::configuration(format!("invalid catalog endpoint {endpoint}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::configuration(format!("catalog endpoint {endpoint} has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Serialize the DescribeImages parameters as a form body
///
/// Parameters are listed pre-sorted so the body doubles as its own
/// canonical form.
fn form_body(filter: &ImageFilter) -> String {
    let params = [
        ("Action", "DescribeImages"),
        ("Filter.1.Name", "name"),
        ("Filter.1.Value.1", filter.name_pattern.as_str()),
        ("Owner.1", filter.owner.as_str()),
        ("Version", API_VERSION),
    ];
    params
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Request context the signature is computed over
struct SigningContext<'a> {
    host: &'a str,
    amz_date: &'a str,
    scope_date: &'a str,
    region: &'a str,
    session_token: Option<&'a str>,
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key for a date/region/service scope
fn signing_key(secret: &str, scope_date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), scope_date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Build the canonical request and the signed-headers list
///
/// Headers appear lowercased in alphabetical order; the request always
/// POSTs to "/" with an empty canonical query string.
fn canonical_request(ctx: &SigningContext<'_>, payload_hash: &str) -> (String, String) {
    let mut headers = vec![
        ("content-type", FORM_CONTENT_TYPE),
        ("host", ctx.host),
        ("x-amz-date", ctx.amz_date),
    ];
    if let Some(token) = ctx.session_token {
        headers.push(("x-amz-security-token", token));
    }

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical =
        format!("POST\n/\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");
    (canonical, signed_headers)
}

/// Compute the Authorization header for a signed DescribeImages request
fn authorization_header(
    credentials: &Credentials,
    ctx: &SigningContext<'_>,
    body: &str,
) -> String {
    let payload_hash = sha256_hex(body.as_bytes());
    let (canonical, signed_headers) = canonical_request(ctx, &payload_hash);

    let scope = format!("{}/{}/ec2/aws4_request", ctx.scope_date, ctx.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        ctx.amz_date,
        scope,
        sha256_hex(canonical.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, ctx.scope_date, ctx.region, "ec2");
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, scope, signed_headers, signature
    )
}

/// Collect `(position, text)` for every `<tag>text</tag>` occurrence
fn tag_values(xml: &str, tag: &str) -> Vec<(usize, String)> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut at = 0;
    while let Some(found) = xml[at..].find(&open) {
        let start = at + found + open.len();
        let Some(end) = xml[start..].find(&close) else {
            break;
        };
        out.push((at + found, xml[start..start + end].trim().to_string()));
        at = start + end + close.len();
    }
    out
}

/// Extract `(id, name)` records from a DescribeImages response body
///
/// Each image item lists `<imageId>` before `<name>`, and nested item sets
/// (block device mappings, tags) contain neither tag, so pairing each id
/// with the next `<name>` that precedes the following id is exact.
fn parse_describe_images(xml: &str) -> Vec<ImageRecord> {
    let mut ids = tag_values(xml, "imageId").into_iter().peekable();
    let mut names = tag_values(xml, "name").into_iter().peekable();

    let mut records = Vec::new();
    while let Some((id_pos, id)) = ids.next() {
        let next_id_pos = ids.peek().map_or(usize::MAX, |(pos, _)| *pos);

        while names.peek().is_some_and(|(pos, _)| *pos < id_pos) {
            names.next();
        }
        if names.peek().is_some_and(|(pos, _)| *pos < next_id_pos) {
            if let Some((_, name)) = names.next() {
                records.push(ImageRecord { id, name });
            }
        }
        // An image without a name token cannot be version-sorted; skip it.
    }
    records
}

/// Pull the first error message out of an EC2 error response body
fn extract_error_message(xml: &str) -> Option<String> {
    tag_values(xml, "Message")
        .into_iter()
        .chain(tag_values(xml, "message"))
        .map(|(_, text)| text)
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod request_construction {
        use super::*;

        #[test]
        fn test_form_body_is_sorted_and_percent_encoded() {
            let filter = ImageFilter {
                name_pattern: "amzn-ami-hvm*.x86_64-gp2".to_string(),
                owner: "amazon".to_string(),
                region: None,
            };

            let body = form_body(&filter);
            assert_eq!(
                body,
                "Action=DescribeImages\
                 &Filter.1.Name=name\
                 &Filter.1.Value.1=amzn-ami-hvm%2A.x86_64-gp2\
                 &Owner.1=amazon\
                 &Version=2016-11-15"
            );
        }

        #[test]
        fn test_host_of_keeps_nonstandard_ports() {
            assert_eq!(
                host_of("https://ec2.us-east-1.amazonaws.com/").expect("valid"),
                "ec2.us-east-1.amazonaws.com"
            );
            assert_eq!(
                host_of("http://127.0.0.1:4566/").expect("valid"),
                "127.0.0.1:4566"
            );
        }
    }

    mod signing {
        use super::*;

        // Key derivation checked against the published Signature V4 worked
        // example (example secret key, 20150830/us-east-1/iam scope).
        const EXAMPLE_SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

        #[test]
        fn test_signing_key_matches_published_vector() {
            let key = signing_key(EXAMPLE_SECRET, "20150830", "us-east-1", "iam");
            assert_eq!(
                hex::encode(key),
                "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
            );
        }

        #[test]
        fn test_canonical_request_shape() {
            let ctx = SigningContext {
                host: "ec2.us-east-1.amazonaws.com",
                amz_date: "20150830T123600Z",
                scope_date: "20150830",
                region: "us-east-1",
                session_token: None,
            };
            let payload_hash = sha256_hex(b"Action=DescribeImages");
            let (canonical, signed_headers) = canonical_request(&ctx, &payload_hash);

            assert_eq!(signed_headers, "content-type;host;x-amz-date");
            assert!(canonical.starts_with("POST\n/\n\n"));
            assert!(canonical.contains("host:ec2.us-east-1.amazonaws.com\n"));
            assert!(canonical.contains("x-amz-date:20150830T123600Z\n"));
            assert!(canonical.ends_with(&payload_hash));
        }

        #[test]
        fn test_session_token_joins_the_signed_headers() {
            let ctx = SigningContext {
                host: "ec2.us-east-1.amazonaws.com",
                amz_date: "20150830T123600Z",
                scope_date: "20150830",
                region: "us-east-1",
                session_token: Some("FwoGZXIvYXdzEBY"),
            };
            let (canonical, signed_headers) = canonical_request(&ctx, "deadbeef");

            assert_eq!(
                signed_headers,
                "content-type;host;x-amz-date;x-amz-security-token"
            );
            assert!(canonical.contains("x-amz-security-token:FwoGZXIvYXdzEBY\n"));
        }

        #[test]
        fn test_authorization_header_carries_scope_and_signature() {
            let credentials = Credentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: EXAMPLE_SECRET.to_string(),
                session_token: None,
            };
            let ctx = SigningContext {
                host: "ec2.us-east-1.amazonaws.com",
                amz_date: "20150830T123600Z",
                scope_date: "20150830",
                region: "us-east-1",
                session_token: None,
            };

            let header = authorization_header(&credentials, &ctx, "Action=DescribeImages");
            assert!(header.starts_with(
                "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/ec2/aws4_request, \
                 SignedHeaders=content-type;host;x-amz-date, Signature="
            ));
            // Signature is 32 bytes hex-encoded.
            let signature = header.rsplit('=').next().expect("has signature");
            assert_eq!(signature.len(), 64);
            assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    mod response_parsing {
        use super::*;

        const RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeImagesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>
    <imagesSet>
        <item>
            <imageId>ami-1a2b3c4d</imageId>
            <imageLocation>amazon/amzn-ami-hvm-2017.03.0.20170417-x86_64-gp2</imageLocation>
            <imageState>available</imageState>
            <imageOwnerId>137112412989</imageOwnerId>
            <isPublic>true</isPublic>
            <architecture>x86_64</architecture>
            <imageType>machine</imageType>
            <name>amzn-ami-hvm-2017.03.0.20170417-x86_64-gp2</name>
            <rootDeviceType>ebs</rootDeviceType>
            <blockDeviceMapping>
                <item>
                    <deviceName>/dev/xvda</deviceName>
                    <ebs>
                        <snapshotId>snap-0e1a2b3c</snapshotId>
                        <volumeSize>8</volumeSize>
                    </ebs>
                </item>
            </blockDeviceMapping>
        </item>
        <item>
            <imageId>ami-9f8e7d6c</imageId>
            <imageState>available</imageState>
            <name>amzn-ami-hvm-2016.09.1.20161221-x86_64-gp2</name>
            <tagSet>
                <item>
                    <key>release</key>
                    <value>stable</value>
                </item>
            </tagSet>
        </item>
    </imagesSet>
</DescribeImagesResponse>"#;

        #[test]
        fn test_pairs_image_ids_with_their_names() {
            let records = parse_describe_images(RESPONSE);
            assert_eq!(
                records,
                vec![
                    ImageRecord {
                        id: "ami-1a2b3c4d".to_string(),
                        name: "amzn-ami-hvm-2017.03.0.20170417-x86_64-gp2".to_string(),
                    },
                    ImageRecord {
                        id: "ami-9f8e7d6c".to_string(),
                        name: "amzn-ami-hvm-2016.09.1.20161221-x86_64-gp2".to_string(),
                    },
                ]
            );
        }

        #[test]
        fn test_image_without_a_name_is_skipped() {
            let xml = "<imagesSet>\
                       <item><imageId>ami-unnamed</imageId></item>\
                       <item><imageId>ami-named</imageId><name>amzn-ami-pv-2016.09.1</name></item>\
                       </imagesSet>";
            let records = parse_describe_images(xml);
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].id, "ami-named");
        }

        #[test]
        fn test_empty_result_set_parses_to_nothing() {
            let xml = "<DescribeImagesResponse><requestId>x</requestId>\
                       <imagesSet/></DescribeImagesResponse>";
            assert!(parse_describe_images(xml).is_empty());
        }

        #[test]
        fn test_error_message_is_extracted_from_failure_body() {
            let xml = "<Response><Errors><Error>\
                       <Code>UnauthorizedOperation</Code>\
                       <Message>You are not authorized to perform this operation.</Message>\
                       </Error></Errors><RequestID>r-1</RequestID></Response>";
            assert_eq!(
                extract_error_message(xml).as_deref(),
                Some("You are not authorized to perform this operation.")
            );
            assert_eq!(extract_error_message("<ok/>"), None);
        }
    }
}
