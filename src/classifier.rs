//! User-agent classification
//!
//! The session engine only consumes the [`Classifier`] trait. [`RuleClassifier`]
//! is the default implementation backed by compiled regex rule tables.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{Classification, DeviceClass};

/// Classifies a user-agent string into bot / device / browser / OS
pub trait Classifier {
    fn classify(&self, user_agent: &str) -> Classification;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rule tables
// ═══════════════════════════════════════════════════════════════════════════════

static RE_BOT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"nuhk|googlebot|googlesecurityscanner|slurp|ask jeeves/teoma|ia_archiver|",
        r"google web preview|mediapartners-google|baiduspider|ezooms|yahooseeker|altavista|",
        r"mercator|scooter|infoseek|ultraseek|lycos|wget|yandex|yadirectfetcher|",
        r"magpie-crawler|nutch crawler|cms crawler|domnutch|netseer|digincore|fr-crawler|",
        r"wesee|aliasio|bingpreview|headlesschrome|facebookexternalhit|facebookplatform|",
        r"facebookexternalua|fb_iab|fbav|bot|crawler|sp(i|y)der"
    ))
    .unwrap()
});

static RE_TABLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ipad|tablet|kindle|playbook|silk|puffin").unwrap());

static RE_PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"mobi|ipod|phone|blackberry|opera mini|fennec|minimo|symbian|psp|nintendo ds|",
        r"archos|skyfire|puffin|blazer|bolt|gobrowser|iris|maemo|semc|teashark|uzard"
    ))
    .unwrap()
});

static RE_IOS: Lazy<Regex> = Lazy::new(|| Regex::new(r"iphone|ipad|ipod").unwrap());

/// Default rule-table classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleClassifier;

impl Classifier for RuleClassifier {
    fn classify(&self, user_agent: &str) -> Classification {
        let ua = user_agent.to_lowercase();
        Classification {
            is_bot: RE_BOT.is_match(&ua),
            device: device_class(&ua),
            browser: browser_name(&ua).to_string(),
            os: os_name(&ua).to_string(),
        }
    }
}

/// Device form factor of a lowercased user agent
pub fn device_class(ua: &str) -> DeviceClass {
    if RE_TABLET.is_match(ua) || android_without_mobile(ua) || windows_touch(ua) {
        DeviceClass::Tablet
    } else if RE_PHONE.is_match(ua) {
        DeviceClass::Phone
    } else {
        DeviceClass::Desktop
    }
}

// "android" with no later "mobile" token
fn android_without_mobile(ua: &str) -> bool {
    ua.match_indices("android")
        .any(|(pos, _)| !ua[pos..].contains("mobile"))
}

// "windows" not followed by "phone" but followed by "touch"
fn windows_touch(ua: &str) -> bool {
    ua.match_indices("windows").any(|(pos, _)| {
        let rest = &ua[pos..];
        !rest.contains("phone") && rest.contains("touch")
    })
}

fn browser_name(ua: &str) -> &'static str {
    if ua.contains("opera") || ua.contains("opr/") {
        "Opera"
    } else if ua.contains("chrome") || ua.contains("crios") {
        "Chrome"
    } else if ua.contains("firefox") || ua.contains("fxios") {
        "Firefox"
    } else if ua.contains("safari") {
        "Safari"
    } else if ua.contains("msie") || ua.contains("trident") {
        "IE"
    } else {
        "unknown"
    }
}

fn os_name(ua: &str) -> &'static str {
    if RE_IOS.is_match(ua) {
        "IOS"
    } else if ua.contains("windows") {
        "Windows"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("macintosh") || ua.contains("mac os") {
        "Mac"
    } else if ua.contains("playstation") || ua.contains("psp") {
        "Sony"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "unknown"
    }
}
