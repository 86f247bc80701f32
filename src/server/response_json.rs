use serde_json::{Map, Value};

/// 从模型输出中提取第一个可解析的 JSON 对象。
///
/// 模型常在 JSON 前后附带说明文字或 ```json 代码块，这里按花括号配对扫描，
/// 字符串字面量内的括号与转义引号不参与配对。
pub fn extract_json_object(content: &str) -> Option<Map<String, Value>> {
    let bytes = content.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = content[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_brace(bytes, start) {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&content[start..=end]) {
                return Some(map);
            }
        }
        search_from = start + 1;
    }
    None
}

// 返回与 `start` 处 `{` 配对的 `}` 的下标
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// 组装返回给调用方的结果：能解析出 JSON 对象则附加 `original_text`，
/// 否则原样放入 `response` 字段。
pub fn merge_model_output(content: &str, original_text: &str) -> Value {
    match extract_json_object(content) {
        Some(mut map) => {
            map.insert(
                "original_text".to_string(),
                Value::String(original_text.to_string()),
            );
            Value::Object(map)
        }
        None => serde_json::json!({
            "response": content,
            "original_text": original_text,
        }),
    }
}
