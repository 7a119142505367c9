//! Named character references recognised by the HTML parser.
//!
//! Covers the HTML 4.01 Latin-1, symbol, and special entity sets plus the
//! handful of HTML5 additions that show up in real pages.

/// Looks up a named character reference (case-sensitive, no `&`/`;`).
#[must_use]
pub fn lookup_entity(name: &str) -> Option<&'static str> {
    let value = match name {
        // XML predefined
        "amp" | "AMP" => "&",
        "lt" | "LT" => "<",
        "gt" | "GT" => ">",
        "quot" | "QUOT" => "\"",
        "apos" => "'",

        // Latin-1
        "nbsp" => "\u{A0}",
        "iexcl" => "\u{A1}",
        "cent" => "\u{A2}",
        "pound" => "\u{A3}",
        "curren" => "\u{A4}",
        "yen" => "\u{A5}",
        "brvbar" => "\u{A6}",
        "sect" => "\u{A7}",
        "uml" => "\u{A8}",
        "copy" | "COPY" => "\u{A9}",
        "ordf" => "\u{AA}",
        "laquo" => "\u{AB}",
        "not" => "\u{AC}",
        "shy" => "\u{AD}",
        "reg" | "REG" => "\u{AE}",
        "macr" => "\u{AF}",
        "deg" => "\u{B0}",
        "plusmn" => "\u{B1}",
        "sup2" => "\u{B2}",
        "sup3" => "\u{B3}",
        "acute" => "\u{B4}",
        "micro" => "\u{B5}",
        "para" => "\u{B6}",
        "middot" => "\u{B7}",
        "cedil" => "\u{B8}",
        "sup1" => "\u{B9}",
        "ordm" => "\u{BA}",
        "raquo" => "\u{BB}",
        "frac14" => "\u{BC}",
        "frac12" => "\u{BD}",
        "frac34" => "\u{BE}",
        "iquest" => "\u{BF}",
        "Agrave" => "\u{C0}",
        "Aacute" => "\u{C1}",
        "Acirc" => "\u{C2}",
        "Atilde" => "\u{C3}",
        "Auml" => "\u{C4}",
        "Aring" => "\u{C5}",
        "AElig" => "\u{C6}",
        "Ccedil" => "\u{C7}",
        "Egrave" => "\u{C8}",
        "Eacute" => "\u{C9}",
        "Ecirc" => "\u{CA}",
        "Euml" => "\u{CB}",
        "Igrave" => "\u{CC}",
        "Iacute" => "\u{CD}",
        "Icirc" => "\u{CE}",
        "Iuml" => "\u{CF}",
        "ETH" => "\u{D0}",
        "Ntilde" => "\u{D1}",
        "Ograve" => "\u{D2}",
        "Oacute" => "\u{D3}",
        "Ocirc" => "\u{D4}",
        "Otilde" => "\u{D5}",
        "Ouml" => "\u{D6}",
        "times" => "\u{D7}",
        "Oslash" => "\u{D8}",
        "Ugrave" => "\u{D9}",
        "Uacute" => "\u{DA}",
        "Ucirc" => "\u{DB}",
        "Uuml" => "\u{DC}",
        "Yacute" => "\u{DD}",
        "THORN" => "\u{DE}",
        "szlig" => "\u{DF}",
        "agrave" => "\u{E0}",
        "aacute" => "\u{E1}",
        "acirc" => "\u{E2}",
        "atilde" => "\u{E3}",
        "auml" => "\u{E4}",
        "aring" => "\u{E5}",
        "aelig" => "\u{E6}",
        "ccedil" => "\u{E7}",
        "egrave" => "\u{E8}",
        "eacute" => "\u{E9}",
        "ecirc" => "\u{EA}",
        "euml" => "\u{EB}",
        "igrave" => "\u{EC}",
        "iacute" => "\u{ED}",
        "icirc" => "\u{EE}",
        "iuml" => "\u{EF}",
        "eth" => "\u{F0}",
        "ntilde" => "\u{F1}",
        "ograve" => "\u{F2}",
        "oacute" => "\u{F3}",
        "ocirc" => "\u{F4}",
        "otilde" => "\u{F5}",
        "ouml" => "\u{F6}",
        "divide" => "\u{F7}",
        "oslash" => "\u{F8}",
        "ugrave" => "\u{F9}",
        "uacute" => "\u{FA}",
        "ucirc" => "\u{FB}",
        "uuml" => "\u{FC}",
        "yacute" => "\u{FD}",
        "thorn" => "\u{FE}",
        "yuml" => "\u{FF}",

        // Special
        "OElig" => "\u{152}",
        "oelig" => "\u{153}",
        "Scaron" => "\u{160}",
        "scaron" => "\u{161}",
        "Yuml" => "\u{178}",
        "circ" => "\u{2C6}",
        "tilde" => "\u{2DC}",
        "ensp" => "\u{2002}",
        "emsp" => "\u{2003}",
        "thinsp" => "\u{2009}",
        "zwnj" => "\u{200C}",
        "zwj" => "\u{200D}",
        "lrm" => "\u{200E}",
        "rlm" => "\u{200F}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "sbquo" => "\u{201A}",
        "ldquo" => "\u{201C}",
        "rdquo" => "\u{201D}",
        "bdquo" => "\u{201E}",
        "dagger" => "\u{2020}",
        "Dagger" => "\u{2021}",
        "permil" => "\u{2030}",
        "lsaquo" => "\u{2039}",
        "rsaquo" => "\u{203A}",
        "euro" => "\u{20AC}",

        // Symbols
        "fnof" => "\u{192}",
        "Alpha" => "\u{391}",
        "Beta" => "\u{392}",
        "Gamma" => "\u{393}",
        "Delta" => "\u{394}",
        "Omega" => "\u{3A9}",
        "alpha" => "\u{3B1}",
        "beta" => "\u{3B2}",
        "gamma" => "\u{3B3}",
        "delta" => "\u{3B4}",
        "epsilon" => "\u{3B5}",
        "lambda" => "\u{3BB}",
        "mu" => "\u{3BC}",
        "pi" => "\u{3C0}",
        "sigma" => "\u{3C3}",
        "omega" => "\u{3C9}",
        "bull" => "\u{2022}",
        "hellip" => "\u{2026}",
        "prime" => "\u{2032}",
        "Prime" => "\u{2033}",
        "oline" => "\u{203E}",
        "frasl" => "\u{2044}",
        "trade" | "TRADE" => "\u{2122}",
        "larr" => "\u{2190}",
        "uarr" => "\u{2191}",
        "rarr" => "\u{2192}",
        "darr" => "\u{2193}",
        "harr" => "\u{2194}",
        "lArr" => "\u{21D0}",
        "rArr" => "\u{21D2}",
        "hArr" => "\u{21D4}",
        "forall" => "\u{2200}",
        "part" => "\u{2202}",
        "exist" => "\u{2203}",
        "empty" => "\u{2205}",
        "nabla" => "\u{2207}",
        "isin" => "\u{2208}",
        "notin" => "\u{2209}",
        "prod" => "\u{220F}",
        "sum" => "\u{2211}",
        "minus" => "\u{2212}",
        "radic" => "\u{221A}",
        "infin" => "\u{221E}",
        "and" => "\u{2227}",
        "or" => "\u{2228}",
        "cap" => "\u{2229}",
        "cup" => "\u{222A}",
        "int" => "\u{222B}",
        "asymp" => "\u{2248}",
        "ne" => "\u{2260}",
        "equiv" => "\u{2261}",
        "le" => "\u{2264}",
        "ge" => "\u{2265}",
        "sub" => "\u{2282}",
        "sup" => "\u{2283}",
        "loz" => "\u{25CA}",
        "spades" => "\u{2660}",
        "clubs" => "\u{2663}",
        "hearts" => "\u{2665}",
        "diams" => "\u{2666}",

        // HTML5 additions
        "check" => "\u{2713}",
        "star" => "\u{2606}",
        "starf" => "\u{2605}",
        "NewLine" => "\n",
        "Tab" => "\t",
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_entity() {
        assert_eq!(lookup_entity("amp"), Some("&"));
        assert_eq!(lookup_entity("nbsp"), Some("\u{A0}"));
        assert_eq!(lookup_entity("eacute"), Some("\u{E9}"));
        assert_eq!(lookup_entity("Eacute"), Some("\u{C9}"));
        assert_eq!(lookup_entity("euro"), Some("\u{20AC}"));
        assert_eq!(lookup_entity("nosuch"), None);
        assert_eq!(lookup_entity("AMP"), Some("&"));
    }
}
