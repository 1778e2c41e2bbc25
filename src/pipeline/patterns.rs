//! Compiled grammars for glog lines and RESTPP/GPE message bodies.
//!
//! Every pattern is compiled once per process and shared.

use std::sync::OnceLock;

use regex::Regex;

/// Rotation marker written between concatenated log files.
pub const ROTATION_MARKER: &str = ">>>>>>>";

pub const RESTPP_RAW_TOKEN: &str = "RawRequest|,";
pub const RESTPP_REQINFO_TOKEN: &str = "RequestInfo|,";

/// `RequestInfo` keys retained per request.
pub const REQINFO_ALLOWED_KEYS: &[&str] = &["graph_name"];

pub const RESTPP_GLOB: &str = "restpp*";
pub const GPE_GLOB: &str = "gpe*";

macro_rules! lazy_regex {
    ($name:ident, $pattern:expr) => {
        pub fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect(concat!("valid regex: ", stringify!($name))))
        }
    };
}

// I<MM><DD> <HH:MM:SS.frac> <tid> <file:line>] <msg>
lazy_regex!(
    glog_info_line,
    r"^I(?P<mm>\d{2})(?P<dd>\d{2})\s+(?P<hms>\d{2}:\d{2}:\d{2}\.\d+)\s+(?P<tid>\d+)\s+.*?\]\s+(?P<msg>.*)$"
);

lazy_regex!(log_header_date, r"INFO\.(?P<year>\d{4})(?P<mmdd>\d{4})");

lazy_regex!(query_endpoint, r"(?i)(?:^|/)?query/[^/]+/(?P<qname>[^?\s|]+)");

lazy_regex!(endpoint_name, r"/query/[^/]+/(?P<q>[^?\s|]+)");

lazy_regex!(
    return_result,
    r"(?i)ReturnResult\|\d+\|(?P<ms>\d+)ms\|(?P<engine>[^|]+)\|(?P<rid>[^|]+)\|"
);

lazy_regex!(request_id, r"(?P<rid>\d+\.RESTPP_[^,\s|]+)");

lazy_regex!(start_run_udf, r"\bStart_RunUDF\b");

lazy_regex!(stop_run_udf, r"Stop_RunUDF\|(?P<ms>\d+)\s*ms");

lazy_regex!(
    udf_step,
    r#"\[UDF_(?P<udf>[^ ]+)\s+log\]\s+"(?P<label>[^"]+)"\s*:\s*(?P<detail>.*)$"#
);

lazy_regex!(iteration_in_detail, r"(?i)\biteration:\s*(?P<iter>\d+)\b");

// 13-digit epoch-ms field inside a request id, dot on both sides.
lazy_regex!(reqid_epoch_ms, r"\.(?P<epoch_ms>\d{13})\.");

/// First request id embedded anywhere in a message.
pub fn extract_request_id(msg: &str) -> Option<&str> {
    request_id()
        .captures(msg)
        .and_then(|c| c.name("rid"))
        .map(|m| m.as_str())
}

/// Epoch milliseconds carried by a request id such as
/// `16974725.RESTPP_1_1.1766154007634.N`.
pub fn extract_epoch_ms(rid: &str) -> Option<i64> {
    reqid_epoch_ms()
        .captures(rid)
        .and_then(|c| c.name("epoch_ms"))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_request_id() {
        assert_eq!(
            extract_request_id("Start_RunUDF 7.RESTPP_1_1.1735729200000.N req=42"),
            Some("7.RESTPP_1_1.1735729200000.N")
        );
        assert_eq!(
            extract_request_id("x|16974725.RESTPP_1_1.1766154007634.N|y"),
            Some("16974725.RESTPP_1_1.1766154007634.N")
        );
        assert_eq!(extract_request_id("no id here"), None);
    }

    #[test]
    fn test_extract_epoch_ms() {
        assert_eq!(
            extract_epoch_ms("16974725.RESTPP_1_1.1766154007634.N"),
            Some(1_766_154_007_634)
        );
        // 12 digits is not an epoch-ms field
        assert_eq!(extract_epoch_ms("1.RESTPP_1_1.176615400763.N"), None);
        // needs a trailing dot
        assert_eq!(extract_epoch_ms("1.RESTPP_1_1.1766154007634"), None);
    }

    #[test]
    fn test_udf_step_grammar() {
        let caps = udf_step()
            .captures(r#"[UDF_myquery log] "Step 3 - expand": iteration: 2, frontier=10"#)
            .unwrap();
        assert_eq!(&caps["udf"], "myquery");
        assert_eq!(&caps["label"], "Step 3 - expand");
        assert_eq!(&caps["detail"], "iteration: 2, frontier=10");
    }

    #[test]
    fn test_query_endpoint_case_insensitive() {
        let caps = query_endpoint().captures("/QUERY/g1/q_opt?x=1").unwrap();
        assert_eq!(&caps["qname"], "q_opt");
    }
}
