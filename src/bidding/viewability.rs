pub const VIEWABLE_RENDERING_MARKER: &str = "ViewableRendering";
pub const VIEWABLE_CONFIG_URL: &str =
    "https://img.ak.impact-ad.jp/ic/pone/ivt/firstview/js/prebid-adformat-config.js";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewabilitySettings {
    pub marker: String,
    pub config_url: String,
}

impl Default for ViewabilitySettings {
    fn default() -> Self {
        Self {
            marker: VIEWABLE_RENDERING_MARKER.to_string(),
            config_url: VIEWABLE_CONFIG_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewableCreative<'a> {
    pub markup: &'a str,
    pub width: u32,
    pub height: u32,
    pub target_id: &'a str,
    /// Scopes the "already written" flag so sibling creatives never share it.
    pub creative_key: &'a str,
}

/// Escapes markup so it survives as a JS template literal.
pub fn escape_for_template(markup: &str) -> String {
    let mut escaped = String::with_capacity(markup.len() + markup.len() / 8);
    for ch in markup.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '/' => escaped.push_str("\\/"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '`' => escaped.push_str("\\`"),
            '$' => escaped.push_str("\\$"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn escape_for_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('<', "\\u003c")
}

/// Wraps markup in a document that writes it into a sibling frame only once
/// the slot crosses the configured viewable percentage.
///
/// Inside a SafeFrame host the frame polls `$sf.ext.inViewPercentage()` every
/// 100ms; otherwise it listens to top-window scroll and checks the slot's
/// bounding rectangle.
pub fn wrap_viewable(settings: &ViewabilitySettings, creative: &ViewableCreative<'_>) -> String {
    let ad_tag = escape_for_template(creative.markup);
    let target_id = escape_for_string(creative.target_id);
    let creative_key = escape_for_string(creative.creative_key);

    format!(
        r#"
<script src="{config_url}"></script>
<script>
(function () {{
  const width = {width};
  const height = {height};
  const adTag = `{ad_tag}`;
  const targetId = "{target_id}";
  const viewKey = "{creative_key}";
  window.YONEPBViewable = window.YONEPBViewable || {{}};
  window.YONEPBViewable[viewKey] = false;
  const viewablePercentage = window.pb_conf.viewablePercentage;
  const viewableRange = height * 0.01 * viewablePercentage;
  const iframe = document.createElement('iframe');
  iframe.setAttribute("style", "border: 0; margin: 0 auto; left: 0; top: 0; width:" + width + "px; height:" + height + "px;");
  iframe.frameBorder = 0;
  iframe.scrolling = 'no';
  const inDap = document.createElement('script');
  inDap.innerHTML = "inDapIF = true;";
  iframe.appendChild(inDap);
  window.frameElement.parentElement.appendChild(iframe);
  const doc = iframe.contentWindow ? iframe.contentWindow.document : iframe.contentDocument;
  const reveal = function () {{
    window.YONEPBViewable[viewKey] = true;
    doc.open(); doc.write(adTag); doc.close();
    window.frameElement.style.display = "none";
  }};
  if (!window.parent.$sf) {{
    const target = window.top.document.getElementById(targetId);
    const onScroll = function () {{
      const targetRect = target.getBoundingClientRect();
      if (!window.YONEPBViewable[viewKey] && window.top.innerHeight - targetRect.top > viewableRange) {{
        reveal();
        window.top.removeEventListener('scroll', onScroll, false);
      }}
    }};
    window.top.addEventListener('scroll', onScroll, false);
  }} else {{
    const poll = function () {{
      if (!window.YONEPBViewable[viewKey] && window.parent.$sf.ext.inViewPercentage() > viewablePercentage) {{
        reveal();
      }}
      if (!window.YONEPBViewable[viewKey]) {{
        setTimeout(poll, 100);
      }}
    }};
    poll();
  }}
}})();
</script>
"#,
        config_url = settings.config_url,
        width = creative.width,
        height = creative.height,
        ad_tag = ad_tag,
        target_id = target_id,
        creative_key = creative_key,
    )
}
