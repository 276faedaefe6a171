//! Page-side JavaScript for the CDP driver.
//!
//! Element handles are integers in a registry on `window.top`, so a handle
//! taken inside a same-origin frame stays valid while the top page lives.
//! A navigation drops the registry and every old handle reads as stale.

/// Error messages starting with this are mapped to `Error::Stale`.
pub(super) const STALE_MARKER: &str = "stale:";

/// Helpers shared by every snippet. Expects `__frame` (innermost entered
/// frame handle, or `null`) to be declared before it.
pub(super) const PRELUDE: &str = r#"
const __R = (() => {
    const t = window.top;
    if (!t.__eokaHandles) t.__eokaHandles = { next: 1, byId: new Map(), ids: new WeakMap() };
    return t.__eokaHandles;
})();
const __reg = (el) => {
    if (!el) return null;
    let id = __R.ids.get(el);
    if (id === undefined) {
        id = __R.next++;
        __R.ids.set(el, id);
        __R.byId.set(id, el);
    }
    return id;
};
const __get = (id) => {
    const el = __R.byId.get(id);
    if (!el) throw new Error('stale: unknown element #' + id);
    if (!el.isConnected) {
        __R.byId.delete(id);
        throw new Error('stale: element #' + id + ' is detached');
    }
    return el;
};
const __doc = () => {
    if (__frame === null) return document;
    const doc = __get(__frame).contentDocument;
    if (!doc) throw new Error('frame #' + __frame + ' is cross-origin');
    return doc;
};
const __scope = (s) => {
    if (s.kind === 'document') return __doc();
    const el = __get(s.id);
    if (s.kind === 'element') return el;
    if (!el.shadowRoot) throw new Error('element #' + s.id + ' has no open shadow root');
    return el.shadowRoot;
};
const __find = (root, q) => {
    if (q.css !== undefined) return Array.from(root.querySelectorAll(q.css));
    if (q.xpath !== undefined) {
        const doc = root.ownerDocument || root;
        const snap = doc.evaluate(q.xpath, root, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
        const out = [];
        for (let i = 0; i < snap.snapshotLength; i++) {
            const n = snap.snapshotItem(i);
            if (n.nodeType === 1) out.push(n);
        }
        return out;
    }
    const needle = q.text.toLowerCase();
    if (!needle) return [];
    return Array.from(root.querySelectorAll('*')).filter(el =>
        el.tagName !== 'SCRIPT' && el.tagName !== 'STYLE' &&
        Array.from(el.childNodes).some(n => n.nodeType === 3 && n.textContent.toLowerCase().includes(needle)));
};
const __visible = (el) => {
    const r = el.getBoundingClientRect();
    if (r.width === 0 && r.height === 0) return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden';
};
const __center = (el) => {
    const r = el.getBoundingClientRect();
    let x = r.left + r.width / 2;
    let y = r.top + r.height / 2;
    let win = el.ownerDocument.defaultView;
    while (win && win.frameElement) {
        const f = win.frameElement.getBoundingClientRect();
        x += f.left;
        y += f.top;
        win = win.parent;
    }
    return { x, y };
};
const __fire = (el, type) => el.dispatchEvent(new Event(type, { bubbles: true }));
"#;

/// Set-of-Marks pass over the top document, including open shadow roots.
/// Returns descriptors for elements inside the viewport.
pub(super) const MARK_JS: &str = r#"
const INTERACTIVE = 'a, button, input, select, textarea, [role="button"], [role="link"], [role="tab"], [role="menuitem"], [role="checkbox"], [role="radio"], [onclick], [contenteditable="true"]';
const results = [];
const seen = new Set();

function label(el) {
    const root = el.getRootNode();
    if (el.id && root.querySelector) {
        const l = root.querySelector('label[for=' + JSON.stringify(el.id) + ']');
        if (l) return l.textContent.trim();
    }
    const parent = el.closest('label');
    if (parent) {
        const clone = parent.cloneNode(true);
        clone.querySelectorAll('input, select, textarea').forEach(c => c.remove());
        const t = clone.textContent.trim();
        if (t) return t;
    }
    return '';
}

// selector relative to the element's own root; shadow content is reached
// through the host with a compound path
function selectorFor(el) {
    const root = el.getRootNode();
    let local;
    const tag = el.tagName.toLowerCase();
    if (el.id) {
        local = '#' + CSS.escape(el.id);
    } else if (el.name && (tag === 'input' || tag === 'select' || tag === 'textarea')) {
        const type = el.getAttribute('type') || '';
        local = tag + '[name=' + JSON.stringify(el.name) + ']';
        if ((type === 'radio' || type === 'checkbox') && el.value) {
            local += '[value=' + JSON.stringify(el.value) + ']';
        }
    } else if (el.getAttribute('aria-label')) {
        local = tag + '[aria-label=' + JSON.stringify(el.getAttribute('aria-label')) + ']';
    } else if (el.getAttribute('data-testid')) {
        local = '[data-testid=' + JSON.stringify(el.getAttribute('data-testid')) + ']';
    } else {
        const parts = [];
        let node = el;
        while (node && node !== document.body && parts.length < 5) {
            let s = node.tagName.toLowerCase();
            if (node.id) {
                parts.unshift('#' + CSS.escape(node.id));
                break;
            }
            const parent = node.parentElement;
            if (parent) {
                const same = Array.from(parent.children).filter(c => c.tagName === node.tagName);
                if (same.length > 1) s += ':nth-of-type(' + (same.indexOf(node) + 1) + ')';
            }
            parts.unshift(s);
            node = parent;
        }
        local = parts.join(' > ');
    }
    if (root instanceof ShadowRoot) return selectorFor(root.host) + ' >> shadow-root >> ' + local;
    return local;
}

function visit(el) {
    const r = el.getBoundingClientRect();
    if (r.width < 2 || r.height < 2) return;
    if (r.bottom < 0 || r.top > window.innerHeight || r.right < 0 || r.left > window.innerWidth) return;
    const style = getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden' || parseFloat(style.opacity) < 0.1) return;

    const tag = el.tagName.toLowerCase();
    const isForm = tag === 'input' || tag === 'select' || tag === 'textarea';
    let text = el.getAttribute('aria-label') || '';
    if (!text) text = isForm ? (label(el) || el.getAttribute('placeholder') || '') : (el.innerText || el.textContent || '');
    text = text.trim().replace(/\s+/g, ' ');
    if (text.length > 60) text = text.substring(0, 57) + '...';

    if ((tag === 'a' || tag === 'button') && el.children.length === 1) {
        const inner = el.children[0].tagName;
        if (inner === 'BUTTON' || inner === 'INPUT') return;
    }

    const selector = selectorFor(el);
    if (seen.has(selector)) return;
    seen.add(selector);

    const cx = r.left + r.width / 2;
    const cy = r.top + r.height / 2;
    results.push({
        id: results.length,
        tag,
        text,
        selector,
        xpath: null,
        center: { x: Math.round(cx + window.scrollX), y: Math.round(cy + window.scrollY) },
        viewportCoords: { centerX: Math.round(cx), centerY: Math.round(cy) },
        href: tag === 'a' ? el.href || null : null,
    });
}

function collect(root) {
    for (const node of root.querySelectorAll('*')) {
        if (node.matches(INTERACTIVE)) visit(node);
        if (node.shadowRoot) collect(node.shadowRoot);
    }
}

collect(document);
return results;
"#;

/// Overlay numbered labels at each mark's viewport position.
pub(super) const OVERLAY_JS: &str = r#"
const container = document.createElement('div');
container.id = '__eoka_pilot_overlay';
const style = document.createElement('style');
style.textContent = `
    .__eoka_pilot_label {
        position: fixed;
        z-index: 2147483647;
        background: rgba(220, 38, 38, 0.9);
        color: white;
        font: bold 11px/13px monospace;
        padding: 1px 3px;
        border-radius: 2px;
        pointer-events: none;
        white-space: nowrap;
        transform: translate(-50%, -50%);
    }
`;
container.appendChild(style);
for (const m of __marks) {
    const label = document.createElement('div');
    label.className = '__eoka_pilot_label';
    label.textContent = String(m.i);
    label.style.left = m.x + 'px';
    label.style.top = m.y + 'px';
    container.appendChild(label);
}
document.documentElement.appendChild(container);
return null;
"#;

pub(super) const REMOVE_OVERLAY_JS: &str =
    "document.getElementById('__eoka_pilot_overlay')?.remove(); return null;";
