//! HTML for the detached graph window.
//!
//! The page is a thin client. It draws the window view on a canvas (colours,
//! highlight rings, pulse phase, timelapse opacity all come from the server),
//! posts every user action to its window routes, and receives sync pushes
//! over the WebSocket. The only things computed in the browser are the
//! placeholder layout and camera tweening.

use crate::window::StandaloneParams;
use serde::Serialize;

// ============================================================================
// CSS Styles
// ============================================================================

pub const STYLE: &str = r#"
:root {
    --bg: #fdf6e3;
    --fg: #586e75;
    --panel: #eee8d5;
    --border: #d9d2bf;
    --accent: #268bd2;
    --ring-referenced: #dc322f;
    --ring-focus: #6c71c4;
    --ring-new: #859900;
}
body.dark {
    --bg: #1b1e24;
    --fg: #c5cad3;
    --panel: #262a33;
    --border: #3a3f4b;
    --accent: #74c0fc;
}

* { box-sizing: border-box; margin: 0; padding: 0; }

body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "Helvetica Neue", Arial, sans-serif;
    color: var(--fg);
    background: var(--bg);
    width: 100vw;
    height: 100vh;
    overflow: hidden;
}

#graph-canvas { display: block; width: 100vw; height: 100vh; }

.toolbar {
    position: absolute;
    top: 12px;
    left: 12px;
    display: flex;
    gap: 6px;
    align-items: center;
    background: var(--panel);
    border: 1px solid var(--border);
    border-radius: 8px;
    padding: 6px 8px;
}
.toolbar input {
    width: 240px;
    padding: 4px 8px;
    border: 1px solid var(--border);
    border-radius: 4px;
    background: var(--bg);
    color: var(--fg);
}
.toolbar button {
    border: 1px solid var(--border);
    background: var(--bg);
    color: var(--fg);
    border-radius: 4px;
    padding: 4px 8px;
    cursor: pointer;
}
.toolbar button.active { border-color: var(--accent); color: var(--accent); }

.advanced {
    position: absolute;
    top: 60px;
    left: 12px;
    background: var(--panel);
    border: 1px solid var(--border);
    border-radius: 8px;
    padding: 8px 12px;
    font-size: 0.85rem;
    display: none;
}
.advanced.open { display: block; }
.status { position: absolute; bottom: 12px; left: 12px; font-size: 0.8rem; opacity: 0.8; }
"#;

// ============================================================================
// Client Script
// ============================================================================

pub const SCRIPT: &str = r#"
(() => {
    const config = JSON.parse(document.getElementById('graph-config').textContent);
    const canvas = document.getElementById('graph-canvas');
    const ctx = canvas.getContext('2d');
    const search = document.getElementById('node-search');
    const status = document.getElementById('status');
    const advanced = document.getElementById('advanced');
    const stats = document.getElementById('stats');
    const base = '/api/window/' + encodeURIComponent(config.brainId) + '/' + encodeURIComponent(config.origin);
    const PULSE_MS = 1500;

    let view = null;
    let receivedAt = 0;
    let camera = { scale: 1, x: 0, y: 0 };
    let timelapse = null;
    const positions = new Map();

    async function call(path, body, method) {
        const resp = await fetch(base + path, {
            method: method || 'POST',
            headers: { 'content-type': 'application/json' },
            body: body === undefined ? undefined : JSON.stringify(body),
        });
        if (resp.status === 204) return null;
        const json = await resp.json();
        if (!resp.ok) throw new Error(json.error || resp.statusText);
        return json;
    }

    // ---- view ----------------------------------------------------------

    function layout() {
        const fresh = [];
        const n = view.nodes.length;
        const radius = Math.max(120, n * 12);
        view.nodes.forEach((node, i) => {
            if (node.position) {
                positions.set(node.id, { x: node.position.x, y: node.position.y });
            } else if (!positions.has(node.id)) {
                const a = (2 * Math.PI * i) / Math.max(1, n);
                const p = { x: Math.cos(a) * radius, y: Math.sin(a) * radius };
                positions.set(node.id, p);
                fresh.push({ id: node.id, x: p.x, y: p.y });
            }
        });
        return fresh;
    }

    async function reportPositions(fresh) {
        if (!fresh.length) return;
        const body = await call('/positions', { positions: fresh });
        if (body && body.initialZoom) camera.scale = body.initialZoom;
    }

    function applyView(next) {
        view = next;
        receivedAt = performance.now();
        document.body.classList.toggle('dark', view.theme === 'dark');
        advanced.classList.toggle('open', view.advancedOpen);
        if (document.activeElement !== search) search.value = view.search.query;
        stats.textContent = view.stats.nodes + ' nodes / ' + view.stats.links + ' links';
        status.textContent = view.error || '';
        reportPositions(layout()).catch(e => { status.textContent = e.message; });
        if (view.camera) runPlan(view.camera);
    }

    async function load(refresh) {
        status.textContent = 'Loading...';
        const url = '/api/graph/' + encodeURIComponent(config.brainId) +
            '?origin=' + encodeURIComponent(config.origin) + (refresh ? '&refresh=true' : '');
        try {
            const resp = await fetch(url);
            const body = await resp.json();
            if (!resp.ok) throw new Error(body.error || resp.statusText);
            // A newer fetch from this window is on its way.
            if (body.stale) return;
            applyView(body);
        } catch (e) {
            status.textContent = 'Failed to load graph: ' + e.message;
        }
    }

    async function act(path, body) {
        try {
            const next = await call(path, body);
            if (next) applyView(next);
            return next;
        } catch (e) {
            status.textContent = e.message;
            return null;
        }
    }

    // ---- camera --------------------------------------------------------

    function tween(from, to, ms, apply) {
        return new Promise(resolve => {
            const start = performance.now();
            function step(now) {
                const t = ms > 0 ? Math.min(1, (now - start) / ms) : 1;
                apply(from + (to - from) * t);
                if (t < 1) requestAnimationFrame(step); else resolve();
            }
            requestAnimationFrame(step);
        });
    }

    async function runPlan(plan) {
        for (const s of plan.steps) {
            if (s.step === 'zoom') {
                await tween(camera.scale, s.scale, s.duration_ms, v => { camera.scale = v; });
            } else if (s.step === 'center') {
                const x0 = camera.x, y0 = camera.y;
                await tween(0, 1, s.duration_ms, t => {
                    camera.x = x0 + (s.x - x0) * t;
                    camera.y = y0 + (s.y - y0) * t;
                });
            } else if (s.step === 'wait') {
                await new Promise(r => setTimeout(r, s.duration_ms));
            }
        }
    }

    // ---- drawing -------------------------------------------------------

    const RING_VARS = {
        referenced: '--ring-referenced',
        focus: '--ring-focus',
        newlyAdded: '--ring-new',
    };

    function pulseAt(node, now) {
        if (node.pulse === null || node.pulse === undefined) return null;
        return (node.pulse + (now - receivedAt) / PULSE_MS) % 1;
    }

    function draw(now) {
        canvas.width = window.innerWidth;
        canvas.height = window.innerHeight;
        ctx.setTransform(camera.scale, 0, 0, camera.scale,
            canvas.width / 2 - camera.x * camera.scale,
            canvas.height / 2 - camera.y * camera.scale);
        ctx.clearRect(-1e5, -1e5, 2e5, 2e5);
        if (!view) return;
        const css = getComputedStyle(document.body);

        ctx.strokeStyle = 'rgba(128,128,128,0.4)';
        view.links.forEach((link, i) => {
            if (timelapse && !timelapse.visibleLinks.includes(i)) return;
            const s = positions.get(link.source);
            const t = positions.get(link.target);
            if (!s || !t) return;
            ctx.beginPath();
            ctx.moveTo(s.x, s.y);
            ctx.lineTo(t.x, t.y);
            ctx.stroke();
        });

        for (const node of view.nodes) {
            const p = positions.get(node.id);
            if (!p) continue;
            ctx.globalAlpha = timelapse ? (timelapse.nodeOpacity[node.id] || 0) : 1;
            const r = 5 + Math.min(node.linkCount, 10);
            ctx.fillStyle = node.color;
            ctx.beginPath();
            ctx.arc(p.x, p.y, r, 0, 2 * Math.PI);
            ctx.fill();
            const pulse = pulseAt(node, now);
            if (node.highlights.length && pulse !== null) {
                ctx.strokeStyle = css.getPropertyValue(RING_VARS[node.highlights[0]]);
                ctx.globalAlpha *= 1 - pulse;
                ctx.beginPath();
                ctx.arc(p.x, p.y, r + 4 + pulse * 12, 0, 2 * Math.PI);
                ctx.stroke();
            }
            ctx.globalAlpha = timelapse ? (timelapse.nodeOpacity[node.id] || 0) : 1;
            ctx.fillStyle = css.getPropertyValue('--fg');
            ctx.fillText(node.name, p.x + r + 2, p.y + 3);
            ctx.globalAlpha = 1;
        }
    }

    function frame(now) {
        draw(now);
        requestAnimationFrame(frame);
    }

    // ---- timelapse -----------------------------------------------------

    async function runTimelapse() {
        try {
            timelapse = await call('/timelapse');
            while (timelapse && !timelapse.finished) {
                await new Promise(r => setTimeout(r, 50));
                timelapse = await call('/timelapse', undefined, 'GET');
            }
        } catch (e) {
            status.textContent = e.message;
        }
        timelapse = null;
    }

    // ---- pointer -------------------------------------------------------

    function toWorld(ev) {
        const rect = canvas.getBoundingClientRect();
        return {
            x: (ev.clientX - rect.left - canvas.width / 2) / camera.scale + camera.x,
            y: (ev.clientY - rect.top - canvas.height / 2) / camera.scale + camera.y,
        };
    }

    function hit(at) {
        if (!view) return null;
        for (const node of view.nodes) {
            const p = positions.get(node.id);
            const r = 5 + Math.min(node.linkCount, 10);
            if (p && Math.hypot(p.x - at.x, p.y - at.y) <= r + 2) return node.id;
        }
        return null;
    }

    let pressed = null;
    canvas.addEventListener('mousedown', ev => {
        const id = hit(toWorld(ev));
        if (id) pressed = { id, moved: false };
    });
    canvas.addEventListener('mousemove', ev => {
        if (!pressed) return;
        const at = toWorld(ev);
        pressed.moved = true;
        positions.set(pressed.id, at);
        call('/drag', { nodeId: pressed.id, x: at.x, y: at.y }).catch(() => {});
    });
    canvas.addEventListener('mouseup', async () => {
        if (!pressed) return;
        const { id, moved } = pressed;
        pressed = null;
        if (moved) {
            call('/drag-end', {}).catch(() => {});
            return;
        }
        const body = await call('/click', { nodeId: id }).catch(() => null);
        if (body && body.camera) runPlan(body.camera);
    });

    // ---- controls ------------------------------------------------------

    let searchTimer = null;
    search.addEventListener('input', () => {
        clearTimeout(searchTimer);
        searchTimer = setTimeout(() => act('/search', { query: search.value }), 150);
    });
    document.getElementById('clear-btn').addEventListener('click', () => act('/clear'));
    document.getElementById('refresh-btn').addEventListener('click', () => act('/refresh'));
    document.getElementById('advanced-btn').addEventListener('click', () => sendKey('k', true));
    document.getElementById('dark-btn').addEventListener('click', () => sendKey('d', true));
    document.getElementById('timelapse-btn').addEventListener('click', runTimelapse);

    async function sendKey(key, ctrl) {
        const body = await act('/key', { key, ctrl, meta: false });
        if (!body) return;
        if (body.shortcut === 'FocusSearch') search.focus();
        if (body.shortcut === 'ClearSearch') { search.value = ''; search.blur(); }
    }

    window.addEventListener('keydown', ev => {
        const mod = ev.ctrlKey || ev.metaKey;
        if (ev.key === 'Escape' || (mod && ['f', 'k', 'd'].includes(ev.key.toLowerCase()))) {
            ev.preventDefault();
            sendKey(ev.key, mod);
        }
    });

    // Messages posted by the opener are interpreted server-side.
    window.addEventListener('message', ev => {
        if (ev.data && typeof ev.data === 'object') act('/message', ev.data);
    });

    function connect() {
        const proto = location.protocol === 'https:' ? 'wss://' : 'ws://';
        const socket = new WebSocket(proto + location.host + '/sync/' +
            encodeURIComponent(config.brainId) + '/ws?origin=' + encodeURIComponent(config.origin));
        socket.onmessage = ev => {
            let push;
            try { push = JSON.parse(ev.data); } catch (e) { return; }
            if (push.view) applyView(push.view);
        };
        socket.onclose = () => setTimeout(connect, 2000);
    }

    load(false);
    connect();
    requestAnimationFrame(frame);
})();
"#;

// ============================================================================
// Page
// ============================================================================

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageConfig<'a> {
    #[serde(flatten)]
    params: &'a StandaloneParams,
    origin: &'a str,
}

/// JSON that is safe inside a `<script>` element.
fn script_json(config: &PageConfig<'_>) -> String {
    serde_json::to_string(config)
        .unwrap_or_else(|_| "{}".to_string())
        .replace('<', "\\u003c")
}

pub fn render_graph_view(params: &StandaloneParams, origin: &str, dark_mode: bool) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="ko">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>brainTrace - {title}</title>
    <style>{STYLE}</style>
</head>
<body class="{body_class}">
    <canvas id="graph-canvas"></canvas>
    <div class="toolbar">
        <input id="node-search" type="search" placeholder="노드 검색 (⌘F)" autocomplete="off">
        <button id="clear-btn" title="하이라이트 해제">해제</button>
        <button id="refresh-btn" title="그래프 새로고침">새로고침</button>
        <button id="advanced-btn" title="고급 컨트롤 토글 (⌘K)">고급</button>
        <button id="dark-btn" title="다크 모드 (⌘D)">테마</button>
        <button id="timelapse-btn" title="타임랩스 재생">타임랩스</button>
    </div>
    <div id="advanced" class="advanced">
        <div id="stats"></div>
    </div>
    <div id="status" class="status"></div>
    <script id="graph-config" type="application/json">{config}</script>
    <script>{SCRIPT}</script>
</body>
</html>"#,
        title = html_escape(&params.brain_id),
        body_class = if dark_mode { "dark" } else { "light" },
        config = script_json(&PageConfig { params, origin }),
    )
}
