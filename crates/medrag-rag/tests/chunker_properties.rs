use medrag_rag::Document;
use medrag_rag::chunker::{chunk, normalize_whitespace, reassemble};
use proptest::prelude::*;

fn text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            "[a-zA-Z]{1,12}",
            Just(" ".to_string()),
            Just(". ".to_string()),
            Just("\n\n".to_string()),
            Just("\t".to_string()),
            "[àéöñ]{1,3}",
        ],
        0..200,
    )
    .prop_map(|parts| parts.concat())
}

fn params_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..120).prop_flat_map(|size| (Just(size), 0..size))
}

proptest! {
    #[test]
    fn chunks_reassemble_to_normalized_text(text in text_strategy(), (size, overlap) in params_strategy()) {
        let document = Document::new("prop", text.clone(), "prop.txt");
        let chunks = chunk(&document, size, overlap).unwrap();

        prop_assert_eq!(reassemble(&chunks), normalize_whitespace(&text));
    }

    #[test]
    fn chunks_respect_size_and_overlap(text in text_strategy(), (size, overlap) in params_strategy()) {
        let document = Document::new("prop", text, "prop.txt");
        let chunks = chunk(&document, size, overlap).unwrap();

        for (i, c) in chunks.iter().enumerate() {
            let len = c.text.chars().count();
            prop_assert!(len >= 1);
            prop_assert!(len <= size);
            prop_assert_eq!(c.sequence, i);
        }

        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let head: String = pair[1].text.chars().take(overlap).collect();
            let tail: String = prev[prev.len() - overlap..].iter().collect();
            prop_assert_eq!(head, tail);
        }
    }

    #[test]
    fn chunking_is_deterministic(text in text_strategy(), (size, overlap) in params_strategy()) {
        let document = Document::new("prop", text, "prop.txt");
        prop_assert_eq!(
            chunk(&document, size, overlap).unwrap(),
            chunk(&document, size, overlap).unwrap()
        );
    }
}
