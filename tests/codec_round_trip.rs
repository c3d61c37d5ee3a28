use tscast::{
    decode_value, encode_value, format_series, generate, parse_response, parse_timestamp,
    EncodeOptions, PromptParams, PromptSpec, PromptType, Record, TsCastError, TsFormat, TsType,
};

const REFERENCE_VALUES: [f64; 4] = [0.0, 1.0, -3.5, 1234.0];

fn hourly(values: &[Option<f64>]) -> Vec<Record> {
    let start = parse_timestamp("2016-07-01 00:00:00").expect("valid timestamp");
    values
        .iter()
        .enumerate()
        .map(|(i, v)| Record::new(start + chrono::Duration::hours(i as i64), *v))
        .collect()
}

#[test]
fn every_format_and_type_recovers_reference_values() {
    let values: Vec<Option<f64>> = REFERENCE_VALUES.iter().copied().map(Some).collect();
    let records = hourly(&values);
    let opts = EncodeOptions::default();

    for ts_format in TsFormat::ALL {
        for ts_type in TsType::ALL {
            let text = format_series(&records, ts_format, ts_type, &opts);
            let parsed = parse_response(&text, ts_format, ts_type)
                .unwrap_or_else(|err| panic!("{ts_format}/{ts_type} failed: {err}\n{text}"));
            let decoded = parsed.forecast(REFERENCE_VALUES.len()).expect("all values present");
            for (got, want) in decoded.iter().zip(REFERENCE_VALUES) {
                assert!((got - want).abs() <= 1e-6, "{ts_format}/{ts_type}: {got} != {want}");
            }
            assert!(!parsed.is_degraded(), "{ts_format}/{ts_type}");
        }
    }
}

#[test]
fn single_tokens_round_trip_for_both_types() {
    let opts = EncodeOptions::default();
    for ts_type in TsType::ALL {
        for v in REFERENCE_VALUES {
            let token = encode_value(Some(v), ts_type, &opts);
            assert_eq!(decode_value(&token, ts_type).expect("decodes"), Some(v));
        }
    }
}

#[test]
fn precision_is_bounded_by_decimals() {
    let opts = EncodeOptions { decimals: 6 };
    let v = 1.0 / 3.0;
    let token = encode_value(Some(v), TsType::Numeric, &opts);
    assert_eq!(token, "0.333333");
    let back = decode_value(&token, TsType::Numeric).expect("decodes").expect("numeric");
    assert!((back - v).abs() <= 1e-6);
}

#[test]
fn documented_array_example() {
    let records = hourly(&[Some(1.0), Some(2.5), Some(-3.0)]);
    let text = format_series(&records, TsFormat::Array, TsType::Numeric, &EncodeOptions::default());
    assert_eq!(text, "[1.0, 2.5, -3.0]");
    let parsed = parse_response(&text, TsFormat::Array, TsType::Numeric).expect("parses");
    assert_eq!(parsed.forecast(3).expect("three values"), vec![1.0, 2.5, -3.0]);
}

#[test]
fn chatty_responses_keep_only_well_formed_tokens() {
    let response = "\
Looking at the daily cycle, values should dip overnight.
<out>
Date|Value
2016-07-01 06:00:00|7.25
2016-07-01 07:00:00|roughly eight
2016-07-01 08:00:00|9.5
</out>
I hope this helps!";
    let parsed = parse_response(response, TsFormat::Custom, TsType::Numeric).expect("parses");
    assert_eq!(parsed.values, vec![Some(7.25), Some(9.5)]);
    assert_eq!(parsed.skipped, 1);
    assert!(matches!(
        parsed.forecast(3),
        Err(TsCastError::PartialParse {
            expected: 3,
            recovered: 2,
            skipped: 1
        })
    ));
}

#[test]
fn prompts_embed_the_encoded_training_series_for_every_layout() {
    let train = hourly(&[Some(5.0), None, Some(7.5), Some(8.0)]);
    let opts = EncodeOptions::default();
    for ts_format in TsFormat::ALL {
        for ts_type in TsType::ALL {
            let spec = PromptSpec {
                prompt_type: PromptType::ZeroShot,
                ts_format,
                ts_type,
                periods: 2,
            };
            let prompt = generate(&train, &spec, &PromptParams::default()).expect("prompt builds");
            assert!(prompt.contains(&format_series(&train, ts_format, ts_type, &opts)));
            assert!(prompt.contains(ts_format.describe()));
        }
    }
}
