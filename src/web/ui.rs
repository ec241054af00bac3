use axum::response::{Html, IntoResponse};

/// 结果页需要的数据：标注图URL与检测到的标签
pub struct PageResult {
    pub image_url: String,
    pub labels: Vec<String>,
}

/// 首页处理器
pub async fn index_handler() -> impl IntoResponse {
    Html(render_page(None))
}

/// 渲染上传页；带结果时在表单下方嵌入标注图与标签列表
pub fn render_page(result: Option<&PageResult>) -> String {
    let result_section = match result {
        Some(result) => {
            let labels_html = if result.labels.is_empty() {
                "<p class=\"empty\">No signs detected</p>".to_string()
            } else {
                let items: String = result
                    .labels
                    .iter()
                    .map(|label| format!("<li>{}</li>", html_escape(label)))
                    .collect();
                format!("<ul class=\"labels\">{}</ul>", items)
            };

            format!(
                r#"<div class="result">
        <h2>Result</h2>
        <img src="{}" alt="Annotated image">
        {}
    </div>"#,
                html_escape(&result.image_url),
                labels_html
            )
        }
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Traffic Sign Detection</title>
    <style>
        * {{ margin: 0; padding: 0; box-sizing: border-box; }}

        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            color: #333;
            padding: 20px;
        }}

        .container {{
            background: white;
            border-radius: 20px;
            padding: 40px;
            box-shadow: 0 20px 60px rgba(0, 0, 0, 0.1);
            max-width: 800px;
            width: 90%;
            text-align: center;
        }}

        h1 {{ color: #5a67d8; margin-bottom: 10px; font-size: 2.2em; }}
        .subtitle {{ color: #666; margin-bottom: 30px; }}

        form {{
            border: 2px dashed #cbd5e0;
            border-radius: 15px;
            padding: 30px 20px;
            margin: 20px 0;
            background: #f8fafc;
        }}

        .btn {{
            background: linear-gradient(135deg, #5a67d8, #667eea);
            color: white;
            border: none;
            padding: 12px 28px;
            border-radius: 10px;
            font-size: 1.05em;
            cursor: pointer;
            margin-top: 15px;
        }}

        .result {{ margin-top: 30px; text-align: left; }}
        .result h2 {{ color: #5a67d8; margin-bottom: 12px; }}
        .result img {{ max-width: 100%; border-radius: 10px; }}
        .labels {{ margin-top: 15px; padding-left: 25px; }}
        .labels li {{ margin: 4px 0; }}
        .empty {{ margin-top: 15px; color: #718096; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Traffic Sign Detection</h1>
        <p class="subtitle">Upload a road scene, get back annotated signs and signals</p>
        <form method="post" action="/" enctype="multipart/form-data">
            <input type="file" name="image" accept="image/*" required>
            <br>
            <button type="submit" class="btn">Detect</button>
        </form>
    {}
    </div>
</body>
</html>"#,
        result_section
    )
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
