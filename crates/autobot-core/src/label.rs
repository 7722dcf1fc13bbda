//! Bank identification: alias-suffix inference, label normalization and the
//! closed set of supported banks.

use once_cell::sync::Lazy;

use crate::error::AutobotError;

/// Alias suffix → portal label. Ordered so the longer `_iobcorp` wins over
/// `_iob`.
const LABEL_BY_SUFFIX: &[(&str, &str)] = &[
    ("_tmb", "TMB"),
    ("_iobcorp", "IOB Corporate"),
    ("_iob", "IOB"),
    ("_kgb", "KGB"),
    ("_idbi", "IDBI"),
    ("_idfc", "IDFC"),
    ("_canara", "CANARA"),
    ("_cnrb", "CANARA"),
];

/// Synonyms accepted on top of the canonical labels.
static SYNONYMS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("INDIAN OVERSEAS BANK", "IOB"),
        ("IOB CORPORATE", "IOB"),
        ("CNRB", "CANARA"),
        ("CANARA BANK", "CANARA"),
        ("KERALA GRAMIN BANK", "KGB"),
        ("TAMILNAD MERCANTILE BANK", "TMB"),
        ("IDFC FIRST", "IDFC"),
        ("IDFC FIRST BANK", "IDFC"),
        ("IDBI BANK", "IDBI"),
    ]
});

/// Infer the bank label from an alias suffix; fallback is the last `_`-token
/// uppercased (`foo_xyz` → `XYZ`).
pub fn infer_bank_label(alias: &str) -> String {
    let a = alias.trim().to_lowercase();
    for (suffix, label) in LABEL_BY_SUFFIX {
        if a.ends_with(suffix) {
            return (*label).to_string();
        }
    }
    match a.rsplit_once('_') {
        Some((_, tail)) => tail.to_uppercase(),
        None => a.to_uppercase(),
    }
}

/// Normalize a label for lookup: uppercase, `&` → `AND`, whitespace collapsed.
pub fn normalize_label(label: &str) -> String {
    let upper = label.to_uppercase().replace('&', " AND ");
    upper.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── BankKind ─────────────────────────────────────────────────────────────────

/// The closed set of supported banks. Adapter dispatch and the statement-sink
/// label both key off this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BankKind {
    Tmb,
    Iob,
    Kgb,
    Idbi,
    Idfc,
    Canara,
}

impl BankKind {
    /// Resolve a bank label (canonical or synonym) to its kind.
    pub fn resolve(label: &str) -> Result<BankKind, AutobotError> {
        let mut norm = normalize_label(label);
        for (syn, canon) in SYNONYMS.iter() {
            if norm == *syn {
                norm = (*canon).to_string();
                break;
            }
        }
        match norm.as_str() {
            "TMB" => Ok(BankKind::Tmb),
            "IOB" => Ok(BankKind::Iob),
            "KGB" => Ok(BankKind::Kgb),
            "IDBI" => Ok(BankKind::Idbi),
            "IDFC" => Ok(BankKind::Idfc),
            "CANARA" => Ok(BankKind::Canara),
            _ => Err(AutobotError::UnsupportedBank(label.to_string())),
        }
    }

    /// Canonical short name, as shown in `/running`.
    pub fn name(&self) -> &'static str {
        match self {
            BankKind::Tmb => "TMB",
            BankKind::Iob => "IOB",
            BankKind::Kgb => "KGB",
            BankKind::Idbi => "IDBI",
            BankKind::Idfc => "IDFC",
            BankKind::Canara => "CANARA",
        }
    }

    /// Exact label the statement sink expects in its bank dropdown.
    pub fn sink_label(&self) -> &'static str {
        match self {
            BankKind::Tmb => "TMB",
            BankKind::Iob => "IOB",
            BankKind::Kgb => "Kerala Gramin Bank",
            BankKind::Idbi => "IDBI",
            BankKind::Idfc => "IDFC",
            BankKind::Canara => "Canara Bank",
        }
    }

    /// Hour of the statement date cutover. IOB and KGB roll at 6 a.m., the
    /// rest at 5 a.m.; kept distinct on purpose.
    pub fn cutover_hour(&self) -> u32 {
        match self {
            BankKind::Iob | BankKind::Kgb => 6,
            _ => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_inference_matches_known_banks() {
        assert_eq!(infer_bank_label("acme_tmb"), "TMB");
        assert_eq!(infer_bank_label("shop_iobcorp"), "IOB Corporate");
        assert_eq!(infer_bank_label("shop_iob"), "IOB");
        assert_eq!(infer_bank_label("x_cnrb"), "CANARA");
        assert_eq!(infer_bank_label("foo_xyz"), "XYZ");
        assert_eq!(infer_bank_label("plain"), "PLAIN");
    }

    #[test]
    fn resolve_accepts_synonyms_and_normalization() {
        assert_eq!(BankKind::resolve("TMB").unwrap(), BankKind::Tmb);
        assert_eq!(
            BankKind::resolve("indian  overseas bank").unwrap(),
            BankKind::Iob
        );
        assert_eq!(BankKind::resolve("CNRB").unwrap(), BankKind::Canara);
        assert_eq!(BankKind::resolve("IOB Corporate").unwrap(), BankKind::Iob);
        assert!(matches!(
            BankKind::resolve("HDFC"),
            Err(AutobotError::UnsupportedBank(_))
        ));
    }

    #[test]
    fn cutover_hours_stay_split() {
        assert_eq!(BankKind::Iob.cutover_hour(), 6);
        assert_eq!(BankKind::Kgb.cutover_hour(), 6);
        assert_eq!(BankKind::Tmb.cutover_hour(), 5);
        assert_eq!(BankKind::Canara.cutover_hour(), 5);
    }

    #[test]
    fn sink_labels_are_the_portal_dropdown_strings() {
        assert_eq!(BankKind::Kgb.sink_label(), "Kerala Gramin Bank");
        assert_eq!(BankKind::Canara.sink_label(), "Canara Bank");
        assert_eq!(BankKind::Iob.sink_label(), "IOB");
    }
}
