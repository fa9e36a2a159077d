mod common;

use rayon::prelude::*;

use common::{DOCUMENT_DATA_PATH, RecordingConsumer, TITLE_PATH, Workspace, sample_veo};
use vers_xml::{CaptureDirective, ParserState, XmlParser};

#[test]
fn test_independent_parsers_in_parallel() {
    let workspace = Workspace::new();
    let documents: Vec<_> = (0..32)
        .map(|i| {
            let content: Vec<u8> = (0..(i * 97 + 1)).map(|b| (b % 256) as u8).collect();
            let path = workspace.write(
                &format!("veo-{i:02}.xml"),
                &sample_veo(&format!("Record {i}"), &content),
            );
            (i, path, content)
        })
        .collect();

    let outcomes: Vec<_> = documents
        .par_iter()
        .map(|(i, path, content)| {
            let destination = workspace.join(&format!("veo-{i:02}.bin"));
            let consumer = RecordingConsumer::new()
                .capture(TITLE_PATH, CaptureDirective::leaf_value())
                .capture(
                    DOCUMENT_DATA_PATH,
                    CaptureDirective::leaf_to_file_base64(&destination),
                );
            let mut parser = XmlParser::new(consumer).unwrap();
            parser.parse(path).unwrap();
            assert_eq!(parser.state(), ParserState::Finished);

            let title = parser.consumer().value(TITLE_PATH).map(str::to_string);
            let written = std::fs::read(&destination).unwrap();
            (*i, title, written == *content)
        })
        .collect();

    assert_eq!(outcomes.len(), 32);
    for (i, title, content_matches) in outcomes {
        assert_eq!(title, Some(format!("Record {i}")));
        assert!(content_matches, "document {i} decoded incorrectly");
    }
}

#[test]
fn test_one_parser_per_thread_reused_for_many_documents() {
    let documents: Vec<String> = (0..200)
        .map(|i| format!("<list><entry n=\"{i}\">value {i}</entry></list>"))
        .collect();

    let values: Vec<String> = documents
        .par_chunks(25)
        .flat_map_iter(|chunk| {
            let consumer =
                RecordingConsumer::new().capture("list/entry", CaptureDirective::leaf_value());
            let mut parser = XmlParser::new(consumer).unwrap();
            let mut values = Vec::new();
            for xml in chunk {
                parser.consumer_mut().callbacks.clear();
                parser.parse_str(xml, "chunk.xml").unwrap();
                values.push(parser.consumer().value("list/entry").unwrap().to_string());
            }
            values
        })
        .collect();

    let expected: Vec<String> = (0..200).map(|i| format!("value {i}")).collect();
    assert_eq!(values, expected);
}
