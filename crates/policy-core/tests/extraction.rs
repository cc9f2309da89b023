mod common;

use policy_core::extraction::{ExtractOptions, TextExtractor, UploadedFile, PAGE_BREAK};
use policy_core::PolicyError;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn pdf_file(bytes: Vec<u8>) -> UploadedFile {
    UploadedFile::new("policy.pdf", Some("application/pdf"), bytes)
}

fn extractor(max_pages: usize) -> TextExtractor {
    TextExtractor::new(ExtractOptions { max_pages })
}

fn expected_block(runs: &[String]) -> String {
    runs.iter()
        .filter(|r| !r.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn test_three_pages_yield_two_markers() {
    let text = extractor(50)
        .extract(&pdf_file(common::numbered_pdf(3)))
        .unwrap();

    assert_eq!(text.matches(PAGE_BREAK).count(), 2);
    assert_eq!(
        text.split(PAGE_BREAK).collect::<Vec<_>>(),
        vec!["Page 1 text", "Page 2 text", "Page 3 text"]
    );
}

#[test]
fn test_page_cap_keeps_leading_pages() {
    let text = extractor(2)
        .extract(&pdf_file(common::numbered_pdf(5)))
        .unwrap();
    assert_eq!(text, format!("Page 1 text{}Page 2 text", PAGE_BREAK));
}

#[test]
fn test_per_call_options_override_default_cap() {
    let extractor = extractor(1);
    let file = pdf_file(common::numbered_pdf(3));
    let text = extractor
        .extract_with(&file, ExtractOptions { max_pages: 3 })
        .unwrap();
    assert_eq!(text.matches(PAGE_BREAK).count(), 2);
}

#[test]
fn test_page_without_text_is_an_empty_block() {
    let pages = vec![
        vec!["Declarations".to_string()],
        vec![],
        vec!["Endorsements".to_string()],
    ];
    let text = extractor(50)
        .extract(&pdf_file(common::pdf_with_runs(&pages)))
        .unwrap();
    assert_eq!(
        text.split(PAGE_BREAK).collect::<Vec<_>>(),
        vec!["Declarations", "", "Endorsements"]
    );
}

#[test]
fn test_special_characters_survive_escaping() {
    let pages = vec![vec!["Limit (per claim): $1,000 \\ 50%".to_string()]];
    let text = extractor(50)
        .extract(&pdf_file(common::pdf_with_runs(&pages)))
        .unwrap();
    assert_eq!(text, "Limit (per claim): $1,000 \\ 50%");
}

#[test]
fn test_pdf_detected_by_content_without_extension() {
    let file = UploadedFile::new("upload", None, common::numbered_pdf(1));
    assert!(file.is_pdf());
    assert_eq!(extractor(50).extract(&file).unwrap(), "Page 1 text");
}

#[test]
fn test_corrupted_pdf_is_parse_error() {
    let mut bytes = common::numbered_pdf(2);
    bytes.truncate(bytes.len() / 3);

    let err = extractor(50).extract(&pdf_file(bytes)).unwrap_err();
    assert!(matches!(err, PolicyError::Parse(_)), "got {:?}", err);
}

#[test]
fn test_non_pdf_bytes_with_pdf_name_is_parse_error() {
    let file = pdf_file(b"this is not a pdf at all".to_vec());
    let err = extractor(50).extract(&file).unwrap_err();
    assert!(matches!(err, PolicyError::Parse(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn pages_come_back_in_order_with_blank_runs_removed(
        pages in prop::collection::vec(
            prop::collection::vec("[A-Za-z0-9 ]{0,12}", 0..4),
            1..8,
        )
    ) {
        let bytes = common::pdf_with_runs(&pages);
        let text = extractor(50).extract(&pdf_file(bytes)).unwrap();

        let blocks: Vec<&str> = text.split(PAGE_BREAK).collect();
        let expected: Vec<String> = pages.iter().map(|runs| expected_block(runs)).collect();
        prop_assert_eq!(blocks.len(), pages.len());
        prop_assert_eq!(blocks, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn page_cap_is_respected(num_pages in 1usize..10, max_pages in 1usize..10) {
        let text = extractor(max_pages)
            .extract(&pdf_file(common::numbered_pdf(num_pages)))
            .unwrap();

        let blocks: Vec<&str> = text.split(PAGE_BREAK).collect();
        let kept = num_pages.min(max_pages);
        prop_assert_eq!(blocks.len(), kept);
        for (i, block) in blocks.iter().enumerate() {
            prop_assert_eq!(block.to_string(), format!("Page {} text", i + 1));
        }
    }
}
