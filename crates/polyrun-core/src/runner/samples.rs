//! Example programs, one per language.

use crate::language::LanguageId;

const JAVASCRIPT: &str = r#"// Fibonacci with a generator
function* fibonacci() {
  let [a, b] = [0, 1];
  while (true) {
    yield a;
    [a, b] = [b, a + b];
  }
}

const first = [];
for (const n of fibonacci()) {
  if (first.length === 10) break;
  first.push(n);
}
console.log("first ten:", first.join(", "));
console.warn("sum:", first.reduce((x, y) => x + y, 0));
"#;

const TYPESCRIPT: &str = r#"// Typed records and a small report
interface Order {
  id: number;
  item: string;
  price: number;
}

const orders: Order[] = [
  { id: 1, item: "keyboard", price: 49.5 },
  { id: 2, item: "mouse", price: 19.0 },
  { id: 3, item: "monitor", price: 189.99 },
];

function total(list: Order[]): number {
  return list.reduce((sum, o) => sum + o.price, 0);
}

for (const o of orders) {
  console.log(`#${o.id} ${o.item.padEnd(10)} ${o.price.toFixed(2)}`);
}
console.log(`total: ${total(orders).toFixed(2)}`);
"#;

const PYTHON: &str = r#"# Word frequencies
from collections import Counter

text = """the quick brown fox jumps over the lazy dog
the dog sleeps and the fox runs"""

counts = Counter(text.split())
for word, count in counts.most_common(5):
    print(f"{word:>6} {'#' * count}")
"#;

const SQL: &str = r#"-- A tiny inventory
CREATE TABLE fruits (name TEXT, color TEXT, stock INTEGER);

INSERT INTO fruits VALUES
  ('apple', 'red', 12),
  ('banana', 'yellow', 30),
  ('cherry', 'red', 150),
  ('kiwi', 'green', 7);

SELECT color, COUNT(*) AS kinds, SUM(stock) AS total
FROM fruits
GROUP BY color
ORDER BY total DESC;
"#;

const LUA: &str = r#"-- Tables as maps and closures
local function counter()
  local n = 0
  return function()
    n = n + 1
    return n
  end
end

local next_id = counter()
local users = {}
for _, name in ipairs({"ada", "grace", "linus"}) do
  users[name] = next_id()
end

for _, name in ipairs({"ada", "grace", "linus"}) do
  print(string.format("%-6s -> %d", name, users[name]))
end
"#;

const MARKDOWN: &str = r#"# Release notes

Things that changed in **this** release:

- [x] Faster startup
- [ ] ~~Dark mode~~ postponed

| Area    | Status |
|---------|--------|
| Parser  | done   |
| Runtime | review |

> Run `polyrun languages` to see what is available.
"#;

/// A small program showing off `language`.
pub fn example_code(language: LanguageId) -> &'static str {
    match language {
        LanguageId::JavaScript => JAVASCRIPT,
        LanguageId::TypeScript => TYPESCRIPT,
        LanguageId::Python => PYTHON,
        LanguageId::Sql => SQL,
        LanguageId::Lua => LUA,
        LanguageId::Markdown => MARKDOWN,
    }
}
