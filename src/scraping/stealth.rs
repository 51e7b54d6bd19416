use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use tracing::debug;

use crate::core::error::{HarvestError, HarvestResult};

/// Fingerprint masking injected before any page script runs.
pub fn stealth_script() -> &'static str {
    r#"
(() => {
    const define = (target, key, value) => {
        try {
            Object.defineProperty(target, key, { get: () => value, configurable: true });
        } catch (_) {}
    };
    const nav = Object.getPrototypeOf(navigator);

    // webdriver must read as undefined, not false
    define(nav, 'webdriver', undefined);

    // headless Chrome reports no plugins
    define(nav, 'plugins', [
        { name: 'PDF Viewer', filename: 'internal-pdf-viewer' },
        { name: 'Chrome PDF Viewer', filename: 'internal-pdf-viewer' },
        { name: 'Chromium PDF Viewer', filename: 'internal-pdf-viewer' },
    ]);
    define(nav, 'languages', ['ko-KR', 'ko', 'en-US', 'en']);

    window.chrome = Object.assign({ runtime: {}, app: {} }, window.chrome || {});

    const perms = navigator.permissions;
    if (perms && perms.query) {
        const query = perms.query.bind(perms);
        perms.query = (desc) =>
            desc && desc.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : query(desc);
    }

    for (const key of Object.keys(window)) {
        if (key.startsWith('cdc_')) {
            try { delete window[key]; } catch (_) {}
        }
    }

    // UNMASKED_VENDOR_WEBGL / UNMASKED_RENDERER_WEBGL
    const patchGl = (proto) => {
        if (!proto) return;
        const original = proto.getParameter;
        proto.getParameter = function (p) {
            if (p === 0x9245) return 'Google Inc. (Apple)';
            if (p === 0x9246) return 'ANGLE (Apple, Apple M1, OpenGL 4.1)';
            return original.call(this, p);
        };
    };
    patchGl(window.WebGLRenderingContext && WebGLRenderingContext.prototype);
    patchGl(window.WebGL2RenderingContext && WebGL2RenderingContext.prototype);
})();
"#
}

/// Register [`stealth_script`] for every document this page loads.
pub async fn inject_stealth(page: &Page) -> HarvestResult<()> {
    debug!("💉 Injecting stealth script");
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(stealth_script()))
        .await
        .map_err(|e| HarvestError::Browser(format!("stealth injection failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_masks_the_usual_tells() {
        let js = stealth_script();
        for needle in ["'webdriver'", "'plugins'", "'languages'", "perms.query", "0x9245"] {
            assert!(js.contains(needle), "missing {}", needle);
        }
    }
}
