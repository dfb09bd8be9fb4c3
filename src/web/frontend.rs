//! Embedded CSS/JS and the page shell for the web workspace.
//!
//! Everything is compiled into the binary as string constants.
//! No external assets, no build tools, no CDN dependencies.

/// Wrap a rendered page body in the document shell.
///
/// `script` is appended after the shared script, for page-specific
/// behavior such as progress polling.
pub fn layout(title: &str, body: &str, script: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} · pneumo</title>
<style>{STYLE}</style>
</head>
<body>
<div class="app">
<header>
  <h1><span class="logo">pneumo</span> {title}</h1>
  <nav>
    <a class="btn btn-ghost" href="/history?patientId=">Patient history</a>
  </nav>
</header>
{body}
</div>
<script>{SCRIPT}{script}</script>
</body>
</html>"#
    )
}

/// Poll `/api/state` while the XAI report is loading and update the bar in
/// place; reload once loading has finished.
pub fn progress_poller(tick_ms: u64) -> String {
    format!(
        r#"
(function pollProgress() {{
  setTimeout(async () => {{
    try {{
      const res = await fetch('/api/state');
      const s = await res.json();
      if (!s.loading) {{ location.reload(); return; }}
      const pct = Math.round(s.progress || 0);
      const fill = document.getElementById('progress-fill');
      if (fill) fill.style.width = pct + '%';
      setText('progress-pct', pct + '%');
      setText('progress-stage', s.stageLabel || '');
      if (s.totalSteps) setText('progress-steps', s.completedSteps + '/' + s.totalSteps + ' steps');
    }} catch (e) {{ /* server restarting */ }}
    pollProgress();
  }}, {tick_ms});
}})();
"#
    )
}

const STYLE: &str = r#"
:root {
  --bg: #0d1117;
  --surface: #161b22;
  --border: #30363d;
  --text: #e6edf3;
  --text-muted: #8b949e;
  --accent: #58a6ff;
  --green: #3fb950;
  --yellow: #d29922;
  --red: #f85149;
  --radius: 8px;
  --font: -apple-system, BlinkMacSystemFont, 'Segoe UI', Helvetica, Arial, sans-serif;
  --mono: 'SF Mono', 'Cascadia Code', 'Fira Code', monospace;
}

* { margin: 0; padding: 0; box-sizing: border-box; }
body {
  background: var(--bg);
  color: var(--text);
  font-family: var(--font);
  font-size: 14px;
  line-height: 1.5;
}

.app { max-width: 1100px; margin: 0 auto; padding: 24px; }

header {
  display: flex;
  align-items: center;
  justify-content: space-between;
  margin-bottom: 24px;
  padding-bottom: 16px;
  border-bottom: 1px solid var(--border);
}
header h1 { font-size: 22px; font-weight: 600; display: flex; gap: 10px; }
header h1 .logo { color: var(--accent); font-family: var(--mono); font-weight: 700; }

.card {
  background: var(--surface);
  border: 1px solid var(--border);
  border-radius: var(--radius);
  padding: 20px;
  margin-bottom: 16px;
}
.card h2 { font-size: 16px; margin-bottom: 12px; }
.muted { color: var(--text-muted); }

.banner {
  border: 1px solid var(--red);
  color: var(--red);
  border-radius: var(--radius);
  padding: 10px 14px;
  margin-bottom: 16px;
}

.grid { display: grid; grid-template-columns: 1fr 1fr; gap: 16px; }
.grid-3 { display: grid; grid-template-columns: repeat(3, 1fr); gap: 16px; }

label { display: block; margin-bottom: 12px; color: var(--text-muted); }
input, select {
  display: block;
  width: 100%;
  margin-top: 4px;
  padding: 8px 10px;
  background: var(--bg);
  color: var(--text);
  border: 1px solid var(--border);
  border-radius: 6px;
  font: inherit;
}

.btn {
  display: inline-block;
  padding: 8px 14px;
  border-radius: 6px;
  border: 1px solid var(--accent);
  background: var(--accent);
  color: var(--bg);
  font: inherit;
  font-weight: 600;
  cursor: pointer;
  text-decoration: none;
}
.btn-ghost { background: transparent; color: var(--accent); }
.btn:disabled { opacity: 0.4; cursor: not-allowed; }
.actions { display: flex; gap: 8px; margin-top: 16px; }
.actions form { display: inline; }

.preview img, .xai-image img, .modal img {
  max-width: 100%;
  border-radius: 6px;
  border: 1px solid var(--border);
}
.xai-image .missing {
  padding: 40px 0;
  text-align: center;
  border: 1px dashed var(--border);
  border-radius: 6px;
}

.diagnosis { font-size: 28px; font-weight: 700; font-family: var(--mono); }
.diagnosis.normal { color: var(--green); }
.diagnosis.abnormal { color: var(--red); }
.confidence { font-size: 18px; color: var(--text-muted); }
.summary li { margin-left: 18px; }

.progress-track {
  height: 10px;
  background: var(--bg);
  border: 1px solid var(--border);
  border-radius: 5px;
  overflow: hidden;
  margin: 12px 0;
}
.progress-fill { height: 100%; background: var(--accent); transition: width 0.3s; }
.progress-meta { display: flex; justify-content: space-between; color: var(--text-muted); }

table { width: 100%; border-collapse: collapse; }
th, td { text-align: left; padding: 8px; border-bottom: 1px solid var(--border); }
th { color: var(--text-muted); font-weight: 500; }

.badge {
  display: inline-block;
  padding: 2px 8px;
  border-radius: 10px;
  font-size: 12px;
  border: 1px solid currentColor;
}
.badge.ok { color: var(--green); }
.badge.pending { color: var(--yellow); }

.modal-backdrop {
  position: fixed;
  inset: 0;
  background: rgba(0, 0, 0, 0.7);
  display: flex;
  align-items: center;
  justify-content: center;
}
.modal {
  background: var(--surface);
  border: 1px solid var(--border);
  border-radius: var(--radius);
  padding: 20px;
  max-width: 960px;
  max-height: 90vh;
  overflow: auto;
}
"#;

/// Shared behavior: local image preview on the form page.
///
/// The selected file is shown through an object URL, which is revoked as
/// soon as the selection changes. The submit button stays disabled until
/// every field has a value.
const SCRIPT: &str = r#"
function setText(id, text) {
  const el = document.getElementById(id);
  if (el) el.textContent = text;
}

(function intakeForm() {
  const form = document.getElementById('intake-form');
  if (!form) return;
  const file = form.querySelector('input[type=file]');
  const img = document.getElementById('local-preview');
  const submit = form.querySelector('button[type=submit]');
  let objectUrl = null;

  function complete() {
    const filled = ['patientName', 'patientId', 'patientAge', 'patientGender']
      .every(name => form.elements[name].value.trim() !== '');
    const f = file.files[0];
    return filled && f && f.type.startsWith('image/');
  }

  file.addEventListener('change', () => {
    if (objectUrl) { URL.revokeObjectURL(objectUrl); objectUrl = null; }
    const f = file.files[0];
    if (f && f.type.startsWith('image/')) {
      objectUrl = URL.createObjectURL(f);
      img.src = objectUrl;
      img.hidden = false;
    } else {
      img.removeAttribute('src');
      img.hidden = true;
    }
  });

  form.addEventListener('input', () => { submit.disabled = !complete(); });
  form.addEventListener('change', () => { submit.disabled = !complete(); });
  form.addEventListener('submit', () => { submit.disabled = true; submit.textContent = 'Analyzing...'; });
  window.addEventListener('pagehide', () => { if (objectUrl) URL.revokeObjectURL(objectUrl); });
  submit.disabled = !complete();
})();

document.querySelectorAll('form.once').forEach(f => {
  f.addEventListener('submit', () => {
    f.querySelectorAll('button').forEach(b => { b.disabled = true; });
  });
});
"#;
