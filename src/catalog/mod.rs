//! Credential-type catalog: the static table of remote endpoints,
//! one per refreshable credential kind.

use http::Method;

/// Default refresh interval in seconds. The issuing service expires
/// credentials after 7200s; refreshing 200s early keeps a margin.
pub const DEFAULT_INTERVAL_SECS: u64 = 7000;

/// Default base URL of the remote token-issuing service.
pub const DEFAULT_API_BASE: &str = "https://api.weixin.qq.com";

/// Kinds of credentials the service can keep fresh.
///
/// The numeric codes double as dependency priority: a type whose refresh
/// reads another type's value carries a higher code and is always started
/// after it (e.g. the js-api ticket needs the primary token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialType {
    PrimaryToken = 0,
    WebOauthToken = 1,
    JsApiTicket = 2,
    ComponentToken = 3,
    AuthorizerToken = 4,
}

/// Exclusive upper bound for valid type codes.
pub const TYPE_LIMIT: i64 = 5;

impl CredentialType {
    /// All types in ascending (dependency) order.
    pub const ALL: [CredentialType; TYPE_LIMIT as usize] = [
        CredentialType::PrimaryToken,
        CredentialType::WebOauthToken,
        CredentialType::JsApiTicket,
        CredentialType::ComponentToken,
        CredentialType::AuthorizerToken,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(CredentialType::PrimaryToken),
            1 => Some(CredentialType::WebOauthToken),
            2 => Some(CredentialType::JsApiTicket),
            3 => Some(CredentialType::ComponentToken),
            4 => Some(CredentialType::AuthorizerToken),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            CredentialType::PrimaryToken => "access_token",
            CredentialType::WebOauthToken => "web_access_token",
            CredentialType::JsApiTicket => "jsapi_ticket",
            CredentialType::ComponentToken => "component_token",
            CredentialType::AuthorizerToken => "authorizer_access_token",
        }
    }

    /// Field of the decoded response that carries the credential itself.
    pub fn value_field(self) -> &'static str {
        match self {
            CredentialType::PrimaryToken => "access_token",
            CredentialType::WebOauthToken => "access_token",
            CredentialType::JsApiTicket => "ticket",
            CredentialType::ComponentToken => "component_access_token",
            CredentialType::AuthorizerToken => "authorizer_access_token",
        }
    }
}

/// One remote endpoint: where and how a credential type is refreshed.
///
/// The URL is a template: query values like `appid=APPID` are placeholders
/// replaced per call by the remote helper.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub name: &'static str,
    pub url: String,
    pub method: Method,
    pub content_type: &'static str,
}

pub const MIME_JSON: &str = "application/json";

/// Process-wide endpoint table, indexed by [`CredentialType`].
///
/// The base URL is fixed in production; tests point it at a local server.
#[derive(Debug, Clone)]
pub struct Catalog {
    descriptors: [Descriptor; TYPE_LIMIT as usize],
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::new(DEFAULT_API_BASE)
    }
}

impl Catalog {
    pub fn new(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let descriptors = [
            Descriptor {
                name: "access_token",
                url: format!(
                    "{base}/cgi-bin/token?grant_type=client_credential&appid=APPID&secret=APPSECRET"
                ),
                method: Method::GET,
                content_type: MIME_JSON,
            },
            Descriptor {
                name: "web_access_token",
                url: format!(
                    "{base}/sns/oauth2/refresh_token?appid=APPID&grant_type=refresh_token&refresh_token=REFRESH_TOKEN"
                ),
                method: Method::GET,
                content_type: MIME_JSON,
            },
            Descriptor {
                name: "jsapi_ticket",
                url: format!("{base}/cgi-bin/ticket/getticket?access_token=ACCESS_TOKEN&type=jsapi"),
                method: Method::GET,
                content_type: MIME_JSON,
            },
            Descriptor {
                name: "component_token",
                url: format!("{base}/cgi-bin/component/api_component_token"),
                method: Method::POST,
                content_type: MIME_JSON,
            },
            Descriptor {
                name: "authorizer_access_token",
                url: format!(
                    "{base}/cgi-bin/component/api_authorizer_token?component_access_token=TOKEN"
                ),
                method: Method::POST,
                content_type: MIME_JSON,
            },
        ];

        Self { descriptors }
    }

    pub fn descriptor(&self, typ: CredentialType) -> &Descriptor {
        &self.descriptors[typ.code() as usize]
    }
}
